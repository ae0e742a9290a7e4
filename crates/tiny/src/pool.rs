//! Literal pools.
//!
//! `tiny.c` keeps `Numbers`/`Strings` as process-wide static arrays shared
//! by every `Tiny_State` that ever exists in the process - the spec's own
//! design notes (§9) flag this as "the principal concurrency limitation"
//! and recommend moving the pools inside the state object so each compiled
//! program owns its pools. This port does exactly that: a `Pools` value
//! lives on `State` and is what `Parser` registers literals into.

use crate::error::{CompileError, SourceLoc};

/// Literal pool caps (`MAX_NUMBERS`/`MAX_STRINGS` in the C source).
pub const MAX_NUMBERS: usize = 4096;
pub const MAX_STRINGS: usize = 4096;

#[derive(Debug, Default, Clone)]
pub struct Pools {
    numbers: Vec<f64>,
    strings: Vec<String>,
}

impl Pools {
    pub fn new() -> Pools {
        Pools::default()
    }

    /// Deduplicates by exact double equality, as the spec requires.
    pub fn register_number(
        &mut self,
        source_text: &str,
        loc: SourceLoc,
        value: f64,
    ) -> Result<u32, CompileError> {
        if let Some(idx) = self.numbers.iter().position(|&n| n == value) {
            return Ok(idx as u32);
        }
        if self.numbers.len() >= MAX_NUMBERS {
            return Err(CompileError::new(
                source_text,
                loc,
                "Number literal pool overflow.",
            ));
        }
        self.numbers.push(value);
        Ok((self.numbers.len() - 1) as u32)
    }

    /// Deduplicates by byte-identical comparison.
    pub fn register_string(
        &mut self,
        source_text: &str,
        loc: SourceLoc,
        value: &str,
    ) -> Result<u32, CompileError> {
        if let Some(idx) = self.strings.iter().position(|s| s == value) {
            return Ok(idx as u32);
        }
        if self.strings.len() >= MAX_STRINGS {
            return Err(CompileError::new(
                source_text,
                loc,
                "String literal pool overflow.",
            ));
        }
        self.strings.push(value.to_string());
        Ok((self.strings.len() - 1) as u32)
    }

    pub fn number(&self, index: u32) -> f64 {
        self.numbers[index as usize]
    }

    pub fn string(&self, index: u32) -> &str {
        &self.strings[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_literals_share_a_pool_slot() {
        let mut pools = Pools::new();
        let loc = SourceLoc::new("t", 1);
        let a = pools.register_number("", loc.clone(), 3.14).unwrap();
        let b = pools.register_number("", loc.clone(), 3.14).unwrap();
        assert_eq!(a, b);

        let s1 = pools.register_string("", loc.clone(), "hi").unwrap();
        let s2 = pools.register_string("", loc, "hi").unwrap();
        assert_eq!(s1, s2);
    }
}
