//! Modules whose codelets run inside an embedded evaluation engine.
//!
//! A codelet is a foreign function named after its task. It is called with
//! `(sockets..., constants..., frame_id, n_frames)` where every socket is
//! boxed as an array holding the current wave window, and returns an integer
//! status. Output and forward arrays are copied back into their sockets.

mod rhai_engine;

pub use rhai_engine::RhaiEngine;

use crate::core::{Codelets, Element, Module, ModuleCore, SocketBuffer, SocketId, Status, TaskId};
use crate::error::{Error, Result};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Upper bound of a foreign call's arguments, function handle included
pub const MAX_CALL_ARGS: usize = 10;

/// Boundary to an embedded evaluation engine.
pub trait ForeignEngine: Send + 'static {
    /// Resolved function handle
    type Function: Clone + Send + fmt::Debug;
    /// Boxed foreign value
    type Value: Clone + Send;

    /// Engine with the same configuration and nothing evaluated
    fn fresh(&self) -> Self
    where
        Self: Sized;

    fn eval(&mut self, code: &str) -> Result<()>;

    fn function(&self, name: &str) -> Result<Self::Function>;

    fn box_array(&mut self, data: &SocketBuffer) -> Result<Self::Value>;

    /// Box the single element of `data`
    fn box_scalar(&mut self, data: &SocketBuffer) -> Result<Self::Value>;

    fn box_index(&mut self, value: usize) -> Self::Value;

    /// Copy a boxed array back into `data`
    fn unbox_array(&mut self, value: &Self::Value, data: &mut SocketBuffer) -> Result<()>;

    fn call(&mut self, function: &Self::Function, args: &[Self::Value]) -> Result<i32>;

    /// Keep `value` alive until released
    fn preserve(&mut self, value: Self::Value) -> u64;

    fn preserved(&self, id: u64) -> Option<Self::Value>;

    fn release(&mut self, id: u64);
}

/// Engine values pinned for each task, released as a whole
#[derive(Debug, Default)]
struct PinTable {
    ids: Vec<Vec<u64>>,
}

impl PinTable {
    fn add_task(&mut self) {
        self.ids.push(Vec::new());
    }

    fn pin<E: ForeignEngine>(&mut self, engine: &mut E, task: TaskId, value: E::Value) {
        let id = engine.preserve(value);
        if let Some(ids) = self.ids.get_mut(task.0) {
            ids.push(id);
        }
    }

    fn values<E: ForeignEngine>(&self, engine: &E, task: TaskId) -> Result<Vec<E::Value>> {
        self.ids
            .get(task.0)
            .into_iter()
            .flatten()
            .map(|&id| {
                engine.preserved(id).ok_or_else(|| {
                    Error::state("ForeignModule", format!("value {} is not pinned", id))
                })
            })
            .collect()
    }

    fn release_all<E: ForeignEngine>(&mut self, engine: &mut E) {
        for ids in &mut self.ids {
            for id in ids.drain(..) {
                engine.release(id);
            }
        }
    }
}

/// Module whose tasks are implemented by foreign code.
///
/// The module has to be evaluated with [`ForeignModule::eval`] before its
/// tasks can run. Clones start unevaluated and evaluate themselves in
/// [`Module::prepare`].
pub struct ForeignModule<E: ForeignEngine> {
    core: ModuleCore,
    codelets: Codelets<ForeignModule<E>>,
    engine: E,
    sources: Vec<Option<String>>,
    constants: Vec<Vec<SocketBuffer>>,
    functions: Vec<Option<E::Function>>,
    pins: PinTable,
    evaluated: bool,
    safe: bool,
}

impl<E: ForeignEngine> ForeignModule<E> {
    pub fn new(name: impl Into<String>, engine: E) -> Self {
        Self {
            core: ModuleCore::new(name),
            codelets: Codelets::new(),
            engine,
            sources: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            pins: PinTable::default(),
            evaluated: false,
            safe: true,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.core.set_name(name);
    }

    pub fn set_short_name(&mut self, short_name: impl Into<String>) {
        self.core.set_short_name(short_name);
    }

    pub fn is_eval(&self) -> bool {
        self.evaluated
    }

    /// In safe mode a panic inside the engine becomes `Error::Foreign`
    pub fn set_safety(&mut self, safe: bool) {
        self.safe = safe;
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Task named after the foreign function implementing it
    pub fn create_task(&mut self, name: impl Into<String>) -> Result<TaskId> {
        let task = self.core.create_task(name)?;
        self.sources.push(None);
        self.constants.push(Vec::new());
        self.functions.push(None);
        self.pins.add_task();
        Ok(task)
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

    /// Extra argument passed after the sockets on every call of `task`
    pub fn create_constant<T: Element>(&mut self, task: TaskId, value: T) -> Result<()> {
        self.check_not_cloned("constant")?;
        let t = self.core.task(task)?;
        if t.has_codelet() {
            return Err(Error::state(
                self.core.qualified_task_name(task),
                "constants have to be created before the codelet",
            ));
        }
        let err = self.untracked(task);
        self.constants
            .get_mut(task.0)
            .ok_or(err)?
            .push(T::into_buffer(vec![value]));
        Ok(())
    }

    /// Evaluate `code` and bind the function named after `task` as its codelet
    pub fn create_codelet(&mut self, task: TaskId, code: &str) -> Result<()> {
        self.check_not_cloned("codelet")?;
        let t = self.core.task(task)?;
        let n_constants = self
            .constants
            .get(task.0)
            .map(Vec::len)
            .ok_or_else(|| self.untracked(task))?;
        let n_args = 1 + t.sockets().len() + n_constants + 2;
        if n_args > MAX_CALL_ARGS {
            return Err(Error::config(
                self.core.qualified_task_name(task),
                format!(
                    "only {} foreign call arguments are supported ('n_args' = {})",
                    MAX_CALL_ARGS, n_args
                ),
            ));
        }
        let name = t.name().to_string();

        self.engine.eval(code)?;
        self.engine.function(&name)?;
        self.codelets.bind(
            &mut self.core,
            task,
            Arc::new(|m: &mut ForeignModule<E>, t: TaskId, frame_id: usize| -> Result<Status> {
                m.call_codelet(t, frame_id)
            }),
        )?;
        if let Some(source) = self.sources.get_mut(task.0) {
            *source = Some(code.to_string());
        }
        Ok(())
    }

    /// Same as `create_codelet` with the code read from `path`
    pub fn create_codelet_file(&mut self, task: TaskId, path: impl AsRef<Path>) -> Result<()> {
        self.check_not_cloned("codelet")?;
        let code = std::fs::read_to_string(path)?;
        self.create_codelet(task, &code)
    }

    /// Load every codelet and pin every constant in the engine
    pub fn eval(&mut self) -> Result<()> {
        if self.evaluated {
            return Err(Error::state(
                self.core.name(),
                "this module has already been evaluated",
            ));
        }
        if self.sources.iter().all(Option::is_none) {
            return Err(Error::state(
                self.core.name(),
                "there is no code to evaluate, call 'create_codelet' first",
            ));
        }

        if let Err(e) = self.load() {
            self.pins.release_all(&mut self.engine);
            for f in &mut self.functions {
                *f = None;
            }
            return Err(e);
        }

        self.evaluated = true;
        debug!(module = self.core.name(), "foreign module evaluated");
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        for (tid, (constants, source)) in self.constants.iter().zip(&self.sources).enumerate() {
            let task = TaskId(tid);
            for constant in constants {
                let value = self.engine.box_scalar(constant)?;
                self.pins.pin(&mut self.engine, task, value);
            }
            if let Some(code) = source {
                self.engine.eval(code)?;
                let name = self.core.task(task)?.name();
                let function = self.engine.function(name)?;
                if let Some(slot) = self.functions.get_mut(tid) {
                    *slot = Some(function);
                }
            }
        }
        Ok(())
    }

    fn untracked(&self, task: TaskId) -> Error {
        Error::state(
            self.core.qualified_task_name(task),
            "the task was not created through this module",
        )
    }

    fn check_not_cloned(&self, what: &str) -> Result<()> {
        if self.core.is_cloned() {
            return Err(Error::state(
                self.core.name(),
                format!("it is not possible to create a new {} on a clone", what),
            ));
        }
        Ok(())
    }

    fn call_codelet(&mut self, task: TaskId, frame_id: usize) -> Result<Status> {
        if !self.evaluated {
            return Err(Error::state(
                self.core.qualified_task_name(task),
                "the task cannot be executed because the module has not been evaluated",
            ));
        }
        let function = self.functions.get(task.0).cloned().flatten().ok_or_else(|| {
            Error::state(
                self.core.qualified_task_name(task),
                "the task has no foreign function",
            )
        })?;

        let n_frames = self.core.wave_len(frame_id);
        let t = self.core.task(task)?;
        let mut args = Vec::with_capacity(t.sockets().len() + 3);
        for socket in t.sockets() {
            let window = socket.copy_frames(frame_id, n_frames)?;
            args.push(self.engine.box_array(&window)?);
        }
        args.extend(self.pins.values(&self.engine, task)?);
        args.push(self.engine.box_index(frame_id));
        args.push(self.engine.box_index(n_frames));

        let code = if self.safe {
            let engine = &mut self.engine;
            catch_unwind(AssertUnwindSafe(|| engine.call(&function, &args))).map_err(|_| {
                Error::foreign(
                    self.core.qualified_task_name(task),
                    "the foreign engine panicked",
                )
            })??
        } else {
            self.engine.call(&function, &args)?
        };

        let n_sockets = self.core.task(task)?.sockets().len();
        for s in 0..n_sockets {
            let socket = self.core.socket_mut(task, SocketId(s))?;
            if !socket.direction().is_output() {
                continue;
            }
            let mut window = socket.copy_frames(frame_id, n_frames)?;
            self.engine.unbox_array(&args[s], &mut window)?;
            socket.write_frames(frame_id, &window)?;
        }
        Ok(Status::new(code))
    }
}

impl<E: ForeignEngine> Module for ForeignModule<E> {
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

    /// Clones share no engine state and have to be evaluated again
    fn clone_module(&self) -> Box<dyn Module> {
        let mut pins = PinTable::default();
        for _ in 0..self.sources.len() {
            pins.add_task();
        }
        Box::new(Self {
            core: self.core.clone_frozen(),
            codelets: self.codelets.clone(),
            engine: self.engine.fresh(),
            sources: self.sources.clone(),
            constants: self.constants.clone(),
            functions: vec![None; self.functions.len()],
            pins,
            evaluated: false,
            safe: self.safe,
        })
    }

    /// Release pinned values and forget the evaluation
    fn reset(&mut self) {
        self.pins.release_all(&mut self.engine);
        for f in &mut self.functions {
            *f = None;
        }
        self.evaluated = false;
        self.core.reset_sockets();
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.evaluated && self.sources.iter().any(Option::is_some) {
            self.eval()?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<E: ForeignEngine> Drop for ForeignModule<E> {
    fn drop(&mut self) {
        self.pins.release_all(&mut self.engine);
    }
}

impl<E: ForeignEngine> fmt::Debug for ForeignModule<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignModule")
            .field("core", &self.core)
            .field("evaluated", &self.evaluated)
            .field("safe", &self.safe)
            .finish()
    }
}
