//! Small built-in packs giving the Worker and its tests something
//! concrete to invoke without depending on a real external pack
//! implementation.

mod echo;
mod failing;
mod sleep;

pub use echo::EchoPack;
pub use failing::FailingPack;
pub use sleep::SleepPack;
