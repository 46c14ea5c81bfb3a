use std::any::Any;

use crate::base::timing::{TimingRequester, TimingResponder};
use crate::error::SimResult;
use crate::sim::top::Sim;
use crate::timeq::EventId;

pub type ComponentId = usize;

/// A long-lived simulation component.  It owns its events and ports; the simulator only hands
/// fired events and port calls back to it.
pub trait SimObject: TimingRequester + TimingResponder + Any {
    fn name(&self) -> &str;

    /// Called once after the whole topology is bound and before the first event fires.
    fn init(&mut self, _sim: &mut Sim) -> SimResult<()> {
        Ok(())
    }

    /// One of the events registered by this component fired.
    fn process(&mut self, sim: &mut Sim, event: EventId) -> SimResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Fills in the boilerplate of `SimObject`; the component needs a `name: String` field.
/// arguments: component type, then the `init`/`process` items
macro_rules! sim_object {
    ($comp:ty, $($method:item)*) => {
        impl $crate::base::module::SimObject for $comp {
            fn name(&self) -> &str {
                &self.name
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }

            $($method)*
        }
    };
}

pub(crate) use sim_object;
