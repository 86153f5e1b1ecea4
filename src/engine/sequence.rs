use crate::core::{exec_task, Module, Socket, SocketBuffer, SocketId, Status, Task, TaskId};
use crate::error::{Error, ExecutionFailure, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Index of a module inside its sequence, in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

/// Stable identity of a task across a sequence and all of its duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    pub module: ModuleId,
    pub task: TaskId,
}

impl TaskRef {
    pub fn new(module: ModuleId, task: TaskId) -> Self {
        Self { module, task }
    }

    pub fn socket(&self, socket: SocketId) -> SocketRef {
        SocketRef {
            module: self.module,
            task: self.task,
            socket,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}.t{}", self.module.0, self.task.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketRef {
    pub module: ModuleId,
    pub task: TaskId,
    pub socket: SocketId,
}

impl SocketRef {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.module, self.task)
    }
}

/// Producer socket (`out`/`fwd`) feeding a consumer socket (`in`/`fwd`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub from: SocketRef,
    pub to: SocketRef,
}

/// Execution order plus the bindings feeding each task
#[derive(Debug, Clone, Default)]
pub struct ExecPlan {
    pub order: Vec<TaskRef>,
    pub inputs: HashMap<TaskRef, Vec<Binding>>,
}

/// Directed graph of modules and the socket bindings between their tasks.
#[derive(Default)]
pub struct Sequence {
    modules: Vec<Box<dyn Module>>,
    bindings: Vec<Binding>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module<M: Module>(&mut self, module: M) -> ModuleId {
        self.add_boxed(Box::new(module))
    }

    pub fn add_boxed(&mut self, module: Box<dyn Module>) -> ModuleId {
        self.modules.push(module);
        ModuleId(self.modules.len() - 1)
    }

    pub fn n_modules(&self) -> usize {
        self.modules.len()
    }

    pub fn module(&self, id: ModuleId) -> Result<&dyn Module> {
        self.modules
            .get(id.0)
            .map(|m| m.as_ref())
            .ok_or_else(|| missing_module(id))
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Result<&mut dyn Module> {
        match self.modules.get_mut(id.0) {
            Some(m) => Ok(m.as_mut()),
            None => Err(missing_module(id)),
        }
    }

    /// Concrete view of a module
    pub fn get<M: Module>(&self, id: ModuleId) -> Result<&M> {
        let module = self.module(id)?;
        let name = module.name().to_string();
        module
            .as_any()
            .downcast_ref::<M>()
            .ok_or_else(|| Error::state(name, "module is not of the requested type"))
    }

    pub fn get_mut<M: Module>(&mut self, id: ModuleId) -> Result<&mut M> {
        let module = self.module_mut(id)?;
        let name = module.name().to_string();
        module
            .as_any_mut()
            .downcast_mut::<M>()
            .ok_or_else(|| Error::state(name, "module is not of the requested type"))
    }

    pub fn task(&self, task: TaskRef) -> Result<&Task> {
        self.module(task.module)?.core().task(task.task)
    }

    /// Find a task by module and task name
    pub fn task_ref(&self, module: ModuleId, name: &str) -> Result<TaskRef> {
        let m = self.module(module)?;
        m.core()
            .task_id(name)
            .map(|t| TaskRef::new(module, t))
            .ok_or_else(|| {
                Error::state(m.name(), format!("task '{}' is not part of this module", name))
            })
    }

    /// `module::task` label used in reports and errors
    pub fn task_name(&self, task: TaskRef) -> String {
        match self.module(task.module) {
            Ok(m) => m.core().qualified_task_name(task.task),
            Err(_) => task.to_string(),
        }
    }

    pub fn socket(&self, socket: SocketRef) -> Result<&Socket> {
        self.module(socket.module)?
            .core()
            .socket(socket.task, socket.socket)
    }

    pub fn socket_mut(&mut self, socket: SocketRef) -> Result<&mut Socket> {
        self.module_mut(socket.module)?
            .core_mut()
            .socket_mut(socket.task, socket.socket)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Connect a producer socket to a consumer socket
    pub fn bind(&mut self, from: SocketRef, to: SocketRef) -> Result<()> {
        let producer = self.socket(from)?;
        let consumer = self.socket(to)?;
        let label = format!(
            "{}.{} -> {}.{}",
            self.task_name(from.task_ref()),
            producer.name(),
            self.task_name(to.task_ref()),
            consumer.name()
        );

        if from == to {
            return Err(Error::config(label, "a socket cannot be bound to itself"));
        }
        if !producer.direction().is_output() {
            return Err(Error::config(label, "producer socket has to be an 'out' or 'fwd' socket"));
        }
        if !consumer.direction().is_input() {
            return Err(Error::config(label, "consumer socket has to be an 'in' or 'fwd' socket"));
        }
        if producer.datatype() != consumer.datatype() {
            return Err(Error::config(
                label,
                format!(
                    "element types differ ({} != {})",
                    producer.datatype(),
                    consumer.datatype()
                ),
            ));
        }
        if producer.n_elmts() != consumer.n_elmts() {
            return Err(Error::config(
                label,
                format!(
                    "element counts differ ({} != {})",
                    producer.n_elmts(),
                    consumer.n_elmts()
                ),
            ));
        }
        if self.bindings.iter().any(|b| b.to == to) {
            return Err(Error::config(label, "consumer socket is already bound"));
        }

        self.bindings.push(Binding { from, to });
        Ok(())
    }

    /// Every task in module insertion then task creation order
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.modules
            .iter()
            .enumerate()
            .flat_map(|(m, module)| {
                (0..module.core().tasks().len()).map(move |t| TaskRef::new(ModuleId(m), TaskId(t)))
            })
            .collect()
    }

    /// Kahn ordering; ties go to the lowest (module, task) pair.
    pub fn topological_order(&self) -> Result<Vec<TaskRef>> {
        let tasks = self.tasks();
        for &t in &tasks {
            if !self.task(t)?.has_codelet() {
                return Err(Error::state(
                    self.task_name(t),
                    "every task of a sequence needs a codelet before scheduling",
                ));
            }
        }

        let mut in_degree: HashMap<TaskRef, usize> = tasks.iter().map(|&t| (t, 0)).collect();
        let mut successors: HashMap<TaskRef, Vec<TaskRef>> = HashMap::new();
        for b in &self.bindings {
            *in_degree.entry(b.to.task_ref()).or_insert(0) += 1;
            successors
                .entry(b.from.task_ref())
                .or_default()
                .push(b.to.task_ref());
        }

        let mut ready: BinaryHeap<Reverse<TaskRef>> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&t, _)| Reverse(t))
            .collect();
        let mut order = Vec::with_capacity(tasks.len());
        while let Some(Reverse(t)) = ready.pop() {
            order.push(t);
            for next in successors.get(&t).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(*next));
                    }
                }
            }
        }

        if order.len() != tasks.len() {
            let mut cyclic: Vec<String> = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&t, _)| self.task_name(t))
                .collect();
            cyclic.sort();
            return Err(Error::scheduling(format!(
                "cyclic dependency between tasks [{}]",
                cyclic.join(", ")
            )));
        }
        Ok(order)
    }

    pub fn plan(&self) -> Result<ExecPlan> {
        let order = self.topological_order()?;
        let mut inputs: HashMap<TaskRef, Vec<Binding>> = HashMap::new();
        for b in &self.bindings {
            inputs.entry(b.to.task_ref()).or_default().push(*b);
        }
        Ok(ExecPlan { order, inputs })
    }

    /// `(n_frames, n_frames_per_wave)` shared by every module
    pub fn frame_layout(&self) -> Result<(usize, usize)> {
        let first = self
            .modules
            .first()
            .ok_or_else(|| Error::config("sequence", "the sequence has no module"))?;
        let layout = (first.core().n_frames(), first.core().n_frames_per_wave());
        for m in &self.modules[1..] {
            let other = (m.core().n_frames(), m.core().n_frames_per_wave());
            if other != layout {
                return Err(Error::config(
                    m.name(),
                    format!(
                        "frame layout (n_frames = {}, n_frames_per_wave = {}) differs from '{}' ({}, {})",
                        other.0,
                        other.1,
                        first.name(),
                        layout.0,
                        layout.1
                    ),
                ));
            }
        }
        Ok(layout)
    }

    pub fn n_frames(&self) -> Result<usize> {
        self.frame_layout().map(|(n, _)| n)
    }

    pub fn n_frames_per_wave(&self) -> Result<usize> {
        self.frame_layout().map(|(_, n)| n)
    }

    pub fn set_n_frames(&mut self, n_frames: usize) -> Result<()> {
        for m in &mut self.modules {
            m.set_n_frames(n_frames)?;
        }
        Ok(())
    }

    pub fn set_n_frames_per_wave(&mut self, n_frames_per_wave: usize) -> Result<()> {
        for m in &mut self.modules {
            m.set_n_frames_per_wave(n_frames_per_wave)?;
        }
        Ok(())
    }

    /// Reset transient state of every module
    pub fn reset(&mut self) {
        for m in &mut self.modules {
            m.reset();
        }
    }

    /// Clone every module and prepare the clones for execution
    pub fn duplicate(&self) -> Result<Sequence> {
        let mut modules = Vec::with_capacity(self.modules.len());
        for m in &self.modules {
            let mut clone = m.clone_module();
            clone.prepare()?;
            modules.push(clone);
        }
        Ok(Sequence {
            modules,
            bindings: self.bindings.clone(),
        })
    }

    /// Run every task over every frame, wave by wave
    pub fn exec(&mut self) -> Result<()> {
        let plan = self.plan()?;
        let (n_frames, n_frames_per_wave) = self.frame_layout()?;
        let mut frame = 0;
        while frame < n_frames {
            self.exec_wave_with(&plan, frame)?;
            frame += n_frames_per_wave;
        }
        Ok(())
    }

    /// Run every task for the wave starting at `first_frame`
    pub fn exec_wave(&mut self, first_frame: usize) -> Result<()> {
        let plan = self.plan()?;
        let (n_frames, _) = self.frame_layout()?;
        if first_frame >= n_frames {
            return Err(Error::state(
                "sequence",
                format!("frame {} is out of range (n_frames = {})", first_frame, n_frames),
            ));
        }
        self.exec_wave_with(&plan, first_frame)
    }

    fn exec_wave_with(&mut self, plan: &ExecPlan, first_frame: usize) -> Result<()> {
        for &task in &plan.order {
            if let Some(inputs) = plan.inputs.get(&task) {
                self.transfer(inputs, first_frame)?;
            }
            let status = self.run_task(task, first_frame)?;
            if !status.is_success() {
                return Err(Error::Execution(self.failure(0, task, first_frame, status)));
            }
        }
        Ok(())
    }

    /// Copy the wave window of each binding from producer to consumer
    pub(crate) fn transfer(&mut self, bindings: &[Binding], first_frame: usize) -> Result<()> {
        for b in bindings {
            let window = self.export(b.from, first_frame)?;
            self.import(b.to, first_frame, &window)?;
        }
        Ok(())
    }

    pub(crate) fn run_task(&mut self, task: TaskRef, first_frame: usize) -> Result<Status> {
        let module = self.module_mut(task.module)?;
        exec_task(module, task.task, first_frame)
    }

    /// Wave window of a socket starting at `first_frame`
    pub(crate) fn export(&self, socket: SocketRef, first_frame: usize) -> Result<SocketBuffer> {
        let module = self.module(socket.module)?;
        let len = module.core().wave_len(first_frame);
        module
            .core()
            .socket(socket.task, socket.socket)?
            .copy_frames(first_frame, len)
    }

    pub(crate) fn import(
        &mut self,
        socket: SocketRef,
        first_frame: usize,
        window: &SocketBuffer,
    ) -> Result<()> {
        self.socket_mut(socket)?.write_frames(first_frame, window)
    }

    pub(crate) fn failure(
        &self,
        stage: usize,
        task: TaskRef,
        frame: usize,
        status: Status,
    ) -> ExecutionFailure {
        let (module, task_name) = match self.module(task.module) {
            Ok(m) => (
                m.name().to_string(),
                m.core()
                    .task(task.task)
                    .map(|t| t.name().to_string())
                    .unwrap_or_else(|_| format!("#{}", task.task.0)),
            ),
            Err(_) => (format!("#{}", task.module.0), format!("#{}", task.task.0)),
        };
        ExecutionFailure {
            stage,
            module,
            task: task_name,
            frame,
            status,
        }
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("Sequence")
            .field("modules", &names)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

fn missing_module(id: ModuleId) -> Error {
    Error::state(
        format!("module #{}", id.0),
        "module is not part of this sequence",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{Initializer, Stateless};

    fn pass(name: &str, n_elmts: usize) -> Stateless {
        let mut m = Stateless::new(name);
        let t = m.create_task("pass").unwrap();
        let s_in = m.create_socket_in::<i32>(t, "in", n_elmts).unwrap();
        let s_out = m.create_socket_out::<i32>(t, "out", n_elmts).unwrap();
        m.create_codelet(t, move |m: &mut Stateless, t, frame| {
            let n = m.core().wave_len(frame);
            let input = m.core().socket(t, s_in)?.frames::<i32>(frame, n)?.to_vec();
            m.core_mut()
                .socket_mut(t, s_out)?
                .frames_mut::<i32>(frame, n)?
                .copy_from_slice(&input);
            Ok(Status::SUCCESS)
        })
        .unwrap();
        m
    }

    fn out_of(m: ModuleId) -> SocketRef {
        TaskRef::new(m, TaskId(0)).socket(SocketId(1))
    }

    fn in_of(m: ModuleId) -> SocketRef {
        TaskRef::new(m, TaskId(0)).socket(SocketId(0))
    }

    #[test]
    fn test_bind_validation() {
        let mut seq = Sequence::new();
        let a = seq.add_module(pass("A", 2));
        let b = seq.add_module(pass("B", 3));
        let c = seq.add_module(pass("C", 2));

        // element count mismatch
        assert!(seq.bind(out_of(a), in_of(b)).unwrap_err().is_config());
        // wrong directions
        assert!(seq.bind(in_of(a), in_of(c)).unwrap_err().is_config());
        assert!(seq.bind(out_of(a), out_of(c)).unwrap_err().is_config());

        seq.bind(out_of(a), in_of(c)).unwrap();
        // a consumer has a single producer
        assert!(seq.bind(out_of(a), in_of(c)).unwrap_err().is_config());
        assert_eq!(seq.bindings().len(), 1);
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let mut seq = Sequence::new();
        let a = seq.add_module(pass("A", 1));
        let b = seq.add_module(pass("B", 1));
        let c = seq.add_module(pass("C", 1));
        // C -> A, B independent
        seq.bind(out_of(c), in_of(a)).unwrap();
        let order = seq.topological_order().unwrap();
        assert_eq!(
            order,
            vec![
                TaskRef::new(b, TaskId(0)),
                TaskRef::new(c, TaskId(0)),
                TaskRef::new(a, TaskId(0)),
            ]
        );
    }

    #[test]
    fn test_cycle_is_a_scheduling_error() {
        let mut seq = Sequence::new();
        let a = seq.add_module(pass("A", 1));
        let b = seq.add_module(pass("B", 1));
        seq.bind(out_of(a), in_of(b)).unwrap();
        seq.bind(out_of(b), in_of(a)).unwrap();
        let err = seq.topological_order().unwrap_err();
        assert!(err.is_scheduling());
        assert!(err.to_string().contains("A::pass"));
    }

    #[test]
    fn test_exec_moves_data_along_bindings() {
        let mut seq = Sequence::new();
        let mut ini = Initializer::<i32>::new(2, 0).unwrap();
        ini.set_n_frames(2).unwrap();
        ini.set_init_data(&[vec![1, 2], vec![3, 4]]).unwrap();
        let ini_out = TaskRef::new(ModuleId(0), ini.task()).socket(ini.out());
        let src = seq.add_module(ini);
        let mut p = pass("P", 2);
        p.set_n_frames(2).unwrap();
        let p = seq.add_module(p);
        assert_eq!(src, ModuleId(0));
        seq.bind(ini_out, in_of(p)).unwrap();

        seq.exec().unwrap();
        assert_eq!(
            seq.socket(out_of(p)).unwrap().data::<i32>().unwrap(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn test_frame_layout_must_agree() {
        let mut seq = Sequence::new();
        assert!(seq.frame_layout().unwrap_err().is_config());
        seq.add_module(pass("A", 1));
        let mut b = pass("B", 1);
        b.set_n_frames(4).unwrap();
        seq.add_module(b);
        assert!(seq.frame_layout().unwrap_err().is_config());
        seq.set_n_frames(4).unwrap();
        seq.set_n_frames_per_wave(2).unwrap();
        assert_eq!(seq.frame_layout().unwrap(), (4, 2));
    }

    #[test]
    fn test_non_success_status_is_reported() {
        let mut seq = Sequence::new();
        let mut m = Stateless::new("Faulty");
        let t = m.create_task("fail").unwrap();
        m.create_codelet(t, |_: &mut Stateless, _, _| Ok(Status::new(7)))
            .unwrap();
        seq.add_module(m);
        match seq.exec() {
            Err(Error::Execution(failure)) => {
                assert_eq!(failure.module, "Faulty");
                assert_eq!(failure.task, "fail");
                assert_eq!(failure.status.code(), 7);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_task_without_codelet_cannot_be_scheduled() {
        let mut seq = Sequence::new();
        let mut m = Stateless::new("Half");
        m.create_task("todo").unwrap();
        seq.add_module(m);
        assert!(seq.topological_order().unwrap_err().is_state());
    }

    #[test]
    fn test_duplicate_shares_nothing() {
        let mut seq = Sequence::new();
        let a = seq.add_module(pass("A", 1));
        let mut dup = seq.duplicate().unwrap();
        dup.socket_mut(in_of(a)).unwrap().data_mut::<i32>().unwrap()[0] = 42;
        assert_eq!(seq.socket(in_of(a)).unwrap().data::<i32>().unwrap(), &[0]);
        assert!(dup.module(a).unwrap().core().is_cloned());
    }
}
