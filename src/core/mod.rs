pub mod buffer;
pub mod module;
pub mod socket;
pub mod task;

pub use buffer::{DataType, Element, SocketBuffer};
pub use module::{exec_task, Codelets, Module, ModuleCore};
pub use socket::{Direction, Socket, SocketId};
pub use task::{Codelet, Status, Task, TaskId};
