//! Two-phase native-module initialization.
//!
//! Phase 1 registers classes and cdata layouts; phase 2 registers methods,
//! static symbols and virtual accessors. Phase 2 only starts once *every*
//! module has finished phase 1, so methods and statics may freely refer to
//! classes from other modules. Registration is finalized (storage
//! exclusivity validated, classes sealed) after the last phase-2 hook.

use crate::unwind::RtResult;
use crate::vm::Runtime;

pub trait NativeModule {
    fn name(&self) -> &str;

    /// Phase 1: classes and cdata layouts only.
    fn register_types(&self, rt: &mut Runtime) -> RtResult<()>;

    /// Phase 2: methods, static symbols, virtual accessors.
    fn register_symbols(&self, rt: &mut Runtime) -> RtResult<()> {
        let _ = rt;
        Ok(())
    }
}

impl Runtime {
    pub fn load_modules(&mut self, modules: &[&dyn NativeModule]) -> RtResult<()> {
        for module in modules {
            log::debug!("module {}: phase 1", module.name());
            module.register_types(self)?;
        }
        for module in modules {
            log::debug!("module {}: phase 2", module.name());
            module.register_symbols(self)?;
        }
        self.finalize_registration()
    }
}
