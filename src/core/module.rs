use super::buffer::Element;
use super::socket::{Direction, Socket, SocketId};
use super::task::{Codelet, Status, Task, TaskId};
use crate::error::{Error, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Structural state shared by every module: name, tasks, sockets and frame layout.
///
/// Tasks, sockets and the frame count are only changed through the owning
/// module, which keeps its per-task and per-frame state in step.
#[derive(Debug, Clone)]
pub struct ModuleCore {
    name: String,
    short_name: String,
    tasks: Vec<Task>,
    n_frames: usize,
    n_frames_per_wave: usize,
    cloned: bool,
}

impl ModuleCore {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            short_name: name.clone(),
            name,
            tasks: Vec::new(),
            n_frames: 1,
            n_frames_per_wave: 1,
            cloned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn set_short_name(&mut self, short_name: impl Into<String>) {
        self.short_name = short_name.into();
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn n_frames_per_wave(&self) -> usize {
        self.n_frames_per_wave
    }

    /// Number of waves needed to cover every frame, the last one possibly partial
    pub fn n_waves(&self) -> usize {
        self.n_frames.div_ceil(self.n_frames_per_wave)
    }

    /// Number of frames in the wave starting at `frame_id`
    pub fn wave_len(&self, frame_id: usize) -> usize {
        self.n_frames_per_wave
            .min(self.n_frames.saturating_sub(frame_id))
    }

    /// True once this core was produced by cloning a module
    pub fn is_cloned(&self) -> bool {
        self.cloned
    }

    /// Tasks in creation order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(id.0).ok_or_else(|| self.missing_task(id))
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        let err = self.missing_task(id);
        self.tasks.get_mut(id.0).ok_or(err)
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.tasks.iter().position(|t| t.name() == name).map(TaskId)
    }

    pub fn socket(&self, task: TaskId, socket: SocketId) -> Result<&Socket> {
        self.task(task)?.socket(socket)
    }

    pub fn socket_mut(&mut self, task: TaskId, socket: SocketId) -> Result<&mut Socket> {
        self.task_mut(task)?.socket_mut(socket)
    }

    pub(crate) fn create_task(&mut self, name: impl Into<String>) -> Result<TaskId> {
        let name = name.into();
        if self.cloned {
            return Err(Error::state(
                &self.name,
                format!("it is not possible to create task '{}' on a clone", name),
            ));
        }
        if self.task_id(&name).is_some() {
            return Err(Error::config(
                &self.name,
                format!("task '{}' already exists in this module", name),
            ));
        }
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task::new(id, name));
        Ok(id)
    }

    pub(crate) fn create_socket_in<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.create_socket::<T>(task, name, Direction::In, n_elmts)
    }

    pub(crate) fn create_socket_out<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.create_socket::<T>(task, name, Direction::Out, n_elmts)
    }

    pub(crate) fn create_socket_fwd<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.create_socket::<T>(task, name, Direction::Fwd, n_elmts)
    }

    fn create_socket<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        direction: Direction,
        n_elmts: usize,
    ) -> Result<SocketId> {
        if self.cloned {
            return Err(Error::state(
                &self.name,
                format!("it is not possible to create socket '{}' on a clone", name),
            ));
        }
        let n_frames = self.n_frames;
        let module = self.name.clone();
        self.task_mut(task)?
            .add_socket(name, direction, T::DATATYPE, n_elmts, n_frames)
            .map_err(|e| match e {
                Error::Config { entity, message } => {
                    Error::config(format!("{}::{}", module, entity), message)
                }
                other => other,
            })
    }

    /// Resize every socket to hold `n_frames` frames, keeping existing frames
    pub(crate) fn set_n_frames(&mut self, n_frames: usize) -> Result<()> {
        if n_frames == 0 {
            return Err(Error::config(&self.name, "'n_frames' has to be greater than 0"));
        }
        self.n_frames = n_frames;
        for task in &mut self.tasks {
            for socket in task.sockets_mut() {
                socket.set_n_frames(n_frames);
            }
        }
        Ok(())
    }

    pub fn set_n_frames_per_wave(&mut self, n_frames_per_wave: usize) -> Result<()> {
        if n_frames_per_wave == 0 {
            return Err(Error::config(
                &self.name,
                "'n_frames_per_wave' has to be greater than 0",
            ));
        }
        self.n_frames_per_wave = n_frames_per_wave;
        Ok(())
    }

    /// Zero every socket buffer and rebind detached sockets
    pub fn reset_sockets(&mut self) {
        for task in &mut self.tasks {
            for socket in task.sockets_mut() {
                socket.reset();
            }
        }
    }

    /// Copy of this core for a cloned module. Clones are frozen structurally.
    pub fn clone_frozen(&self) -> Self {
        let mut core = self.clone();
        core.cloned = true;
        core
    }

    pub(crate) fn qualified_task_name(&self, id: TaskId) -> String {
        match self.tasks.get(id.0) {
            Some(task) => format!("{}::{}", self.name, task.name()),
            None => format!("{}::#{}", self.name, id.0),
        }
    }

    fn missing_task(&self, id: TaskId) -> Error {
        Error::state(
            &self.name,
            format!(
                "task #{} is not part of this module ({} tasks)",
                id.0,
                self.tasks.len()
            ),
        )
    }
}

/// Codelets of a module, indexed by task id.
///
/// Codelets hold no mutable state; every per-instance value lives in the module,
/// so clones share the same table.
pub struct Codelets<M: ?Sized> {
    table: Vec<Option<Arc<dyn Codelet<M>>>>,
}

impl<M: ?Sized> Codelets<M> {
    pub fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Bind `codelet` to `task`; fails on clones and on already bound tasks
    pub fn bind(
        &mut self,
        core: &mut ModuleCore,
        task: TaskId,
        codelet: Arc<dyn Codelet<M>>,
    ) -> Result<()> {
        if core.is_cloned() {
            return Err(Error::state(
                core.name(),
                "it is not possible to create a new codelet on a clone",
            ));
        }
        let qualified = core.qualified_task_name(task);
        let t = core.task_mut(task)?;
        if t.has_codelet() {
            return Err(Error::state(qualified, "a codelet is already bound to this task"));
        }
        t.mark_codelet_bound();
        if self.table.len() <= task.0 {
            self.table.resize_with(task.0 + 1, || None);
        }
        self.table[task.0] = Some(codelet);
        Ok(())
    }

    pub fn get(&self, core: &ModuleCore, task: TaskId) -> Result<Arc<dyn Codelet<M>>> {
        self.table
            .get(task.0)
            .and_then(|c| c.clone())
            .ok_or_else(|| {
                Error::state(
                    core.qualified_task_name(task),
                    "no codelet is bound to this task",
                )
            })
    }
}

impl<M: ?Sized> Default for Codelets<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ?Sized> Clone for Codelets<M> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<M: ?Sized> fmt::Debug for Codelets<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.table.iter().filter(|c| c.is_some()).count();
        write!(f, "Codelets {{ bound: {} }}", bound)
    }
}

/// A processing unit that owns tasks and the state their codelets work on.
pub trait Module: Send + 'static {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    /// Run the codelet of `task` for the wave starting at `frame_id`
    fn exec_codelet(&mut self, task: TaskId, frame_id: usize) -> Result<Status>;

    /// Independent copy sharing no mutable state; the copy is structurally frozen
    fn clone_module(&self) -> Box<dyn Module>;

    /// Return transient execution state to its initial condition
    fn reset(&mut self) {}

    /// One-time setup required before a (cloned) instance can execute
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_n_frames(&mut self, n_frames: usize) -> Result<()> {
        self.core_mut().set_n_frames(n_frames)
    }

    fn set_n_frames_per_wave(&mut self, n_frames_per_wave: usize) -> Result<()> {
        self.core_mut().set_n_frames_per_wave(n_frames_per_wave)
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn name(&self) -> &str {
        self.core().name()
    }
}

/// Execute `task` of `module` for the wave starting at `frame_id`.
pub fn exec_task(module: &mut dyn Module, task: TaskId, frame_id: usize) -> Result<Status> {
    let core = module.core();
    let t = core.task(task)?;
    if !t.has_codelet() {
        return Err(Error::state(
            core.qualified_task_name(task),
            "no codelet is bound to this task",
        ));
    }
    if frame_id >= core.n_frames() {
        return Err(Error::state(
            core.qualified_task_name(task),
            format!(
                "frame {} is out of range (n_frames = {})",
                frame_id,
                core.n_frames()
            ),
        ));
    }
    module.exec_codelet(task, frame_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_layout() {
        let mut core = ModuleCore::new("Source");
        core.set_n_frames(10).unwrap();
        core.set_n_frames_per_wave(4).unwrap();
        assert_eq!(core.n_waves(), 3);
        assert_eq!(core.wave_len(0), 4);
        assert_eq!(core.wave_len(8), 2);
        assert!(core.set_n_frames_per_wave(0).unwrap_err().is_config());
        assert!(core.set_n_frames(0).unwrap_err().is_config());
    }

    #[test]
    fn test_create_task_rejects_duplicates() {
        let mut core = ModuleCore::new("Source");
        core.create_task("generate").unwrap();
        assert!(core.create_task("generate").unwrap_err().is_config());
        assert_eq!(core.tasks().len(), 1);
    }

    #[test]
    fn test_frozen_core_rejects_structure_changes() {
        let mut core = ModuleCore::new("Source");
        let t = core.create_task("generate").unwrap();
        let mut frozen = core.clone_frozen();
        assert!(frozen.is_cloned());
        assert!(frozen.create_task("extra").unwrap_err().is_state());
        assert!(frozen.create_socket_out::<f32>(t, "out", 4).unwrap_err().is_state());
        assert_eq!(frozen.tasks().len(), 1);
    }

    #[test]
    fn test_socket_errors_are_qualified() {
        let mut core = ModuleCore::new("Source");
        let t = core.create_task("generate").unwrap();
        match core.create_socket_out::<f32>(t, "out", 0) {
            Err(Error::Config { entity, .. }) => assert_eq!(entity, "Source::out"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_codelet_binding_rules() {
        let mut core = ModuleCore::new("Source");
        let t = core.create_task("generate").unwrap();
        let mut codelets: Codelets<ModuleCore> = Codelets::new();
        let codelet: Arc<dyn Codelet<ModuleCore>> =
            Arc::new(|_: &mut ModuleCore, _: TaskId, _: usize| -> Result<Status> {
                Ok(Status::SUCCESS)
            });

        assert!(matches!(codelets.get(&core, t), Err(e) if e.is_state()));
        codelets.bind(&mut core, t, codelet.clone()).unwrap();
        assert!(core.task(t).unwrap().has_codelet());
        assert!(codelets.bind(&mut core, t, codelet.clone()).unwrap_err().is_state());
        assert!(codelets.bind(&mut core, TaskId(4), codelet.clone()).unwrap_err().is_state());

        let mut frozen = core.clone_frozen();
        let t2 = TaskId(0);
        let mut fresh: Codelets<ModuleCore> = Codelets::new();
        assert!(fresh.bind(&mut frozen, t2, codelet).unwrap_err().is_state());
    }
}
