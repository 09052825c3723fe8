//! Generic stage kinds.
pub mod dummy;
pub mod generate;
pub mod range_check;

pub use dummy::Dummy;
pub use generate::GenerateRows;
pub use range_check::RangeCheck;

use crate::stage::StageRegistry;

/// Register every built in stage kind.
pub fn register_builtins(registry: &mut StageRegistry) {
    registry.register(Dummy::KIND, |_, _| Ok(Box::new(Dummy)));
    registry.register(GenerateRows::KIND, |def, copy| {
        Ok(Box::new(GenerateRows::from_definition(def, copy)?))
    });
    registry.register(RangeCheck::KIND, |def, _| Ok(Box::new(RangeCheck::from_definition(def)?)));
}
