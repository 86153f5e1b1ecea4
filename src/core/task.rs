use super::buffer::{DataType, Element};
use super::socket::{Direction, Socket, SocketId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code returned by a codelet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(0);

    pub fn new(code: i32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "SUCCESS")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Index of a task inside its module, in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

/// Executable body bound to one task.
///
/// Invoked once per wave with the first frame of that wave; it must process
/// every frame of the wave window.
pub trait Codelet<M: ?Sized>: Send + Sync {
    fn invoke(&self, module: &mut M, task: TaskId, frame_id: usize) -> Result<Status>;
}

impl<M, F> Codelet<M> for F
where
    M: ?Sized,
    F: Fn(&mut M, TaskId, usize) -> Result<Status> + Send + Sync,
{
    fn invoke(&self, module: &mut M, task: TaskId, frame_id: usize) -> Result<Status> {
        self(module, task, frame_id)
    }
}

/// A named unit of work owned by a module.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    name: String,
    sockets: Vec<Socket>,
    codelet_bound: bool,
}

impl Task {
    pub(crate) fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sockets: Vec::new(),
            codelet_bound: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sockets in declaration order, which is also the codelet parameter order
    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    pub fn has_codelet(&self) -> bool {
        self.codelet_bound
    }

    pub fn socket(&self, id: SocketId) -> Result<&Socket> {
        self.sockets.get(id.0).ok_or_else(|| self.missing_socket(id))
    }

    pub fn socket_mut(&mut self, id: SocketId) -> Result<&mut Socket> {
        let err = self.missing_socket(id);
        self.sockets.get_mut(id.0).ok_or(err)
    }

    pub fn socket_id(&self, name: &str) -> Option<SocketId> {
        self.sockets
            .iter()
            .position(|s| s.name() == name)
            .map(SocketId)
    }

    /// Shorthand for reading a socket's frames by id
    pub fn input<T: Element>(&self, id: SocketId, first: usize, count: usize) -> Result<&[T]> {
        self.socket(id)?.frames(first, count)
    }

    /// Shorthand for writing a socket's frames by id
    pub fn output<T: Element>(
        &mut self,
        id: SocketId,
        first: usize,
        count: usize,
    ) -> Result<&mut [T]> {
        self.socket_mut(id)?.frames_mut(first, count)
    }

    pub(crate) fn add_socket(
        &mut self,
        name: &str,
        direction: Direction,
        datatype: DataType,
        n_elmts: usize,
        n_frames: usize,
    ) -> Result<SocketId> {
        if self.codelet_bound {
            return Err(Error::state(
                &self.name,
                format!("cannot add socket '{}' after the codelet has been bound", name),
            ));
        }
        if self.socket_id(name).is_some() {
            return Err(Error::config(
                &self.name,
                format!("socket '{}' already exists on this task", name),
            ));
        }
        let socket = Socket::new(name, direction, datatype, n_elmts, n_frames)?;
        self.sockets.push(socket);
        Ok(SocketId(self.sockets.len() - 1))
    }

    pub(crate) fn mark_codelet_bound(&mut self) {
        self.codelet_bound = true;
    }

    pub(crate) fn sockets_mut(&mut self) -> &mut [Socket] {
        &mut self.sockets
    }

    fn missing_socket(&self, id: SocketId) -> Error {
        Error::state(
            &self.name,
            format!(
                "socket #{} does not exist (task has {} sockets)",
                id.0,
                self.sockets.len()
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::new(2).is_success());
        assert_eq!(Status::default(), Status::SUCCESS);
        assert_eq!(Status::from(-1).code(), -1);
    }

    #[test]
    fn test_socket_order_is_declaration_order() {
        let mut task = Task::new(TaskId(0), "process");
        let a = task.add_socket("a", Direction::In, DataType::F32, 2, 1).unwrap();
        let b = task.add_socket("b", Direction::Out, DataType::F32, 2, 1).unwrap();
        assert_eq!((a, b), (SocketId(0), SocketId(1)));
        assert_eq!(task.socket_id("b"), Some(SocketId(1)));
        let names: Vec<&str> = task.sockets().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_socket_name_is_rejected() {
        let mut task = Task::new(TaskId(0), "process");
        task.add_socket("x", Direction::In, DataType::U8, 1, 1).unwrap();
        let err = task.add_socket("x", Direction::Out, DataType::U8, 1, 1).unwrap_err();
        assert!(err.is_config());
        assert_eq!(task.sockets().len(), 1);
    }

    #[test]
    fn test_sockets_frozen_after_codelet() {
        let mut task = Task::new(TaskId(0), "process");
        task.mark_codelet_bound();
        let err = task.add_socket("late", Direction::In, DataType::U8, 1, 1).unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn test_missing_socket() {
        let task = Task::new(TaskId(3), "empty");
        assert!(task.socket(SocketId(0)).unwrap_err().is_state());
    }
}
