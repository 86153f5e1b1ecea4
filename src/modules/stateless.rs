use crate::core::{Codelets, Element, Module, ModuleCore, SocketId, Status, TaskId};
use crate::error::Result;
use std::any::Any;
use std::sync::Arc;

/// Module without per-instance state whose tasks and codelets are declared by the caller.
///
/// ```
/// use wavepipe::core::{Module, Status};
/// use wavepipe::modules::Stateless;
///
/// let mut incr = Stateless::new("Incr");
/// let t = incr.create_task("incr").unwrap();
/// let s_in = incr.create_socket_in::<i32>(t, "in", 4).unwrap();
/// let s_out = incr.create_socket_out::<i32>(t, "out", 4).unwrap();
/// incr.create_codelet(t, move |m: &mut Stateless, t, frame| {
///     let n = m.core().wave_len(frame);
///     let input = m.core().socket(t, s_in)?.frames::<i32>(frame, n)?.to_vec();
///     let out = m.core_mut().socket_mut(t, s_out)?.frames_mut::<i32>(frame, n)?;
///     for (o, i) in out.iter_mut().zip(input) {
///         *o = i + 1;
///     }
///     Ok(Status::SUCCESS)
/// })
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct Stateless {
    core: ModuleCore,
    codelets: Codelets<Stateless>,
}

impl Stateless {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ModuleCore::new(name),
            codelets: Codelets::new(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.core.set_name(name);
    }

    pub fn set_short_name(&mut self, short_name: impl Into<String>) {
        self.core.set_short_name(short_name);
    }

    pub fn create_task(&mut self, name: impl Into<String>) -> Result<TaskId> {
        self.core.create_task(name)
    }

    pub fn create_socket_in<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.core.create_socket_in::<T>(task, name, n_elmts)
    }

    pub fn create_socket_out<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.core.create_socket_out::<T>(task, name, n_elmts)
    }

    pub fn create_socket_fwd<T: Element>(
        &mut self,
        task: TaskId,
        name: &str,
        n_elmts: usize,
    ) -> Result<SocketId> {
        self.core.create_socket_fwd::<T>(task, name, n_elmts)
    }

    pub fn create_codelet<F>(&mut self, task: TaskId, codelet: F) -> Result<()>
    where
        F: Fn(&mut Stateless, TaskId, usize) -> Result<Status> + Send + Sync + 'static,
    {
        self.codelets.bind(&mut self.core, task, Arc::new(codelet))
    }
}

impl Module for Stateless {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn exec_codelet(&mut self, task: TaskId, frame_id: usize) -> Result<Status> {
        let codelet = self.codelets.get(&self.core, task)?;
        codelet.invoke(self, task, frame_id)
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(Self {
            core: self.core.clone_frozen(),
            codelets: self.codelets.clone(),
        })
    }

    fn reset(&mut self) {
        self.core.reset_sockets();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
