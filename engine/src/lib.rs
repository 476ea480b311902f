pub mod acceptor;
pub mod command;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod registry;

pub use acceptor::{AcceptorQueue, InMemoryAcceptorQueue, ParkedRead};
pub use command::{Command, CommitRef, LogRecord};
pub use engine::{EngineHandle, EngineLifecycle};
pub use errors::EngineError;
pub use registry::{FunctionRegistry, HostFunction};
