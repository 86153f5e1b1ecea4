use crate::core::{Codelets, Element, Module, ModuleCore, SocketBuffer, SocketId, Status, TaskId};
use crate::error::{Error, Result};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source module copying pre-configured per-frame data into its `out` socket.
///
/// Optionally spins for `ns` nanoseconds per frame to emulate a fixed processing latency.
#[derive(Debug)]
pub struct Initializer<T: Element> {
    core: ModuleCore,
    codelets: Codelets<Initializer<T>>,
    init_data: Vec<Vec<T>>,
    ns: u64,
    task: TaskId,
    out: SocketId,
}

impl<T: Element> Initializer<T> {
    pub fn new(n_elmts: usize, ns: u64) -> Result<Self> {
        let name = "Initializer";
        if n_elmts == 0 {
            return Err(Error::config(name, "'n_elmts' has to be greater than 0"));
        }

        let mut core = ModuleCore::new(name);
        let task = core.create_task("initialize")?;
        let out = core.create_socket_out::<T>(task, "out", n_elmts)?;

        let mut codelets: Codelets<Initializer<T>> = Codelets::new();
        codelets.bind(
            &mut core,
            task,
            Arc::new(move |m: &mut Initializer<T>, t: TaskId, frame_id: usize| -> Result<Status> {
                m.initialize_wave(t, out, frame_id)?;
                Ok(Status::SUCCESS)
            }),
        )?;

        Ok(Self {
            init_data: vec![vec![T::default(); n_elmts]; core.n_frames()],
            core,
            codelets,
            ns,
            task,
            out,
        })
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn out(&self) -> SocketId {
        self.out
    }

    pub fn n_elmts(&self) -> usize {
        self.init_data.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn get_ns(&self) -> u64 {
        self.ns
    }

    pub fn set_ns(&mut self, ns: u64) {
        self.ns = ns;
    }

    pub fn init_data(&self) -> &[Vec<T>] {
        &self.init_data
    }

    /// Use the same row for every frame
    pub fn set_init_data_row(&mut self, row: &[T]) -> Result<()> {
        if row.len() != self.n_elmts() {
            return Err(Error::config(
                self.core.name(),
                format!(
                    "'init_data.len()' has to be equal to n_elmts ({} != {})",
                    row.len(),
                    self.n_elmts()
                ),
            ));
        }
        for ini in &mut self.init_data {
            ini.copy_from_slice(row);
        }
        Ok(())
    }

    /// One row per frame; nothing is modified unless every row matches
    pub fn set_init_data(&mut self, rows: &[Vec<T>]) -> Result<()> {
        if rows.len() != self.core.n_frames() {
            return Err(Error::config(
                self.core.name(),
                format!(
                    "'init_data.len()' has to be equal to n_frames ({} != {})",
                    rows.len(),
                    self.core.n_frames()
                ),
            ));
        }
        let n_elmts = self.n_elmts();
        if let Some((f, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_elmts) {
            return Err(Error::config(
                self.core.name(),
                format!(
                    "'init_data[{}].len()' has to be equal to n_elmts ({} != {})",
                    f,
                    row.len(),
                    n_elmts
                ),
            ));
        }
        for (ini, row) in self.init_data.iter_mut().zip(rows) {
            ini.copy_from_slice(row);
        }
        Ok(())
    }

    /// Fill every frame with a single value
    pub fn set_init_value(&mut self, value: T) {
        for ini in &mut self.init_data {
            ini.fill(value);
        }
    }

    /// Execute one frame into caller storage. The output socket is rebound to
    /// `storage` for the call and the storage is handed back afterwards.
    pub fn initialize_into(&mut self, storage: Vec<T>, frame_id: usize) -> Result<Vec<T>> {
        let task = self.task;
        let out = self.out;
        let previous = self
            .core
            .socket_mut(task, out)?
            .bind(T::into_buffer(storage))?;

        let result = crate::core::exec_task(self, task, frame_id);

        let socket = self.core.socket_mut(task, out)?;
        let bound = socket.unbind();
        if let Some(previous) = previous {
            socket.bind(previous)?;
        }
        result?;

        let bound =
            bound.ok_or_else(|| Error::state(self.core.name(), "output socket lost its buffer"))?;
        T::from_buffer(bound).map_err(|b: SocketBuffer| {
            Error::state(
                self.core.name(),
                format!("output socket holds {} data", b.datatype()),
            )
        })
    }

    fn initialize_wave(&mut self, task: TaskId, out: SocketId, frame_id: usize) -> Result<()> {
        let n = self.core.wave_len(frame_id);
        let rows = self.init_data.get(frame_id..frame_id + n).ok_or_else(|| {
            Error::state(
                self.core.name(),
                format!(
                    "frames [{}, {}) have no init data ({} rows)",
                    frame_id,
                    frame_id + n,
                    self.init_data.len()
                ),
            )
        })?;
        let ns = self.ns;
        let socket = self.core.socket_mut(task, out)?;
        for (f, row) in (frame_id..frame_id + n).zip(rows) {
            let start = if ns > 0 { Some(Instant::now()) } else { None };
            socket.frame_mut::<T>(f)?.copy_from_slice(row);
            if let Some(start) = start {
                busy_wait(start, Duration::from_nanos(ns));
            }
        }
        Ok(())
    }
}

/// Active wait on the monotonic clock
fn busy_wait(start: Instant, duration: Duration) {
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

impl<T: Element> Module for Initializer<T> {
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
            init_data: self.init_data.clone(),
            ns: self.ns,
            task: self.task,
            out: self.out,
        })
    }

    fn reset(&mut self) {
        self.core.reset_sockets();
    }

    /// New frames start as a copy of frame 0
    fn set_n_frames(&mut self, n_frames: usize) -> Result<()> {
        let old_n_frames = self.core.n_frames();
        if old_n_frames == n_frames {
            return Ok(());
        }
        self.core.set_n_frames(n_frames)?;
        let n_elmts = self.core.socket(self.task, self.out)?.n_elmts();
        let first = self
            .init_data
            .first()
            .cloned()
            .unwrap_or_else(|| vec![T::default(); n_elmts]);
        self.init_data.resize(n_frames, first);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
