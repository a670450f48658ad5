pub use crate::executor::{JoinHandle, Task};
pub use crate::kernel;
pub use crate::phase::{InfraRef, Infrastructure, Phase, PhaseManager};
pub use crate::randomizer::Randomizer;
pub use crate::scoreboard::{ScoreboardInOrder, ScoreboardOutOfOrder};
pub use crate::signal::SimObject;
pub use crate::stream::{Bundle, Flow, Stream};
pub use crate::tb_obj::TbObj;
pub use crate::transaction::Transaction;
pub use crate::trigger::{Event, Trigger};
pub use crate::utils::{clock_cycles, ClockDomain};
pub use crate::{fail_test, pass_test, TbError, TbResult};
pub use futures::future::FutureExt;
