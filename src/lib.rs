//! Self-organizing street-light cluster: nodes coordinate over IP multicast
//! to elect exactly one master, poll environmental readings, and push
//! display payloads back to the slaves.

pub mod dispatch;
pub mod display;
pub mod node;
pub mod sensor;
pub mod timer;
pub mod transport;
pub mod wire;

pub use display::{ConsoleDisplay, DisplaySink};
pub use node::{ClusterError, Node, Outgoing, Role, State, Target, CLUSTER_PORT};
pub use sensor::{RandomSensor, SensorSource};
pub use timer::{MuxTimer, TimerArm, TimerPurpose};
pub use wire::{BlockId, DisplayData, Frame, Mode, Opcode, SensorData};
