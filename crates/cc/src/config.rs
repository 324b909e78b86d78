//! Driver-level compiler configuration (SPEC_FULL.md §A.3).
//!
//! Mirrors the builder shape of the teacher workspace's `compiler::config`
//! module, but collects the knobs spec §6's CLI surface actually needs:
//! predefined/undefined macros, include search paths, forced includes, the
//! `-std=` dialect, and the family of ABI/section/stack-reuse flags that flow
//! into code generation decisions. It is plain data — the driver only ever
//! populates it from `argv`, never from a config file — so no serialization
//! crate is pulled in for it.

/// `-std=cNN` dialect selection (spec §6). The core pipeline does not yet
/// vary behavior per dialect beyond accepting the flag; it is threaded
/// through so a future diagnostic ("this construct needs -std=c99 or later")
/// has somewhere to read it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Std {
    C89,
    #[default]
    C99,
    C11,
    C17,
    C23,
}

impl std::str::FromStr for Std {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c89" | "gnu89" => Ok(Std::C89),
            "c99" | "gnu99" => Ok(Std::C99),
            "c11" | "gnu11" => Ok(Std::C11),
            "c17" | "c18" | "gnu17" | "gnu18" => Ok(Std::C17),
            "c23" | "gnu23" => Ok(Std::C23),
            other => Err(format!("unsupported -std= dialect: {other}")),
        }
    }
}

/// `-fstack-reuse=...` (spec §4.4's `dont_reuse_stack`/`-fstack-reuse=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackReuse {
    #[default]
    All,
    Named,
}

impl std::str::FromStr for StackReuse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(StackReuse::All),
            "named" => Ok(StackReuse::Named),
            other => Err(format!("unsupported -fstack-reuse= value: {other}")),
        }
    }
}

/// A `-D NAME` or `-D NAME=VALUE` predefinition, applied to the macro table
/// before any source token is preprocessed.
#[derive(Debug, Clone)]
pub struct Define {
    pub name: String,
    pub value: Option<String>,
}

/// Collects every driver-level knob from spec §6 that the core pipeline
/// consults. Plain data, builder-populated, never (de)serialized.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    pub defines: Vec<Define>,
    pub undefines: Vec<String>,
    pub include_paths: Vec<String>,
    pub forced_includes: Vec<String>,
    pub std: Std,
    pub pic: bool,
    pub common: bool,
    pub data_sections: bool,
    pub function_sections: bool,
    pub stack_reuse: StackReuse,
    pub unsigned_char: bool,
    pub debug_info: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig { common: true, ..Default::default() }
    }

    pub fn with_define(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.defines.push(Define { name: name.into(), value });
        self
    }

    pub fn with_undefine(mut self, name: impl Into<String>) -> Self {
        self.undefines.push(name.into());
        self
    }

    pub fn with_include_path(mut self, path: impl Into<String>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_forced_include(mut self, path: impl Into<String>) -> Self {
        self.forced_includes.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_allows_common_symbols() {
        // matches `-fcommon` being GCC/widcc's default.
        assert!(CompilerConfig::new().common);
    }

    #[test]
    fn std_parses_gnu_aliases() {
        assert_eq!("gnu11".parse::<Std>().unwrap(), Std::C11);
        assert!("c++17".parse::<Std>().is_err());
    }

    #[test]
    fn builder_accumulates_defines_and_paths() {
        let cfg = CompilerConfig::new()
            .with_define("DEBUG", None)
            .with_define("VERSION", Some("2".into()))
            .with_include_path("/usr/local/include");
        assert_eq!(cfg.defines.len(), 2);
        assert_eq!(cfg.include_paths, vec!["/usr/local/include"]);
    }
}
