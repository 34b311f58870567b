// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Programmer-error invariant checks.
//!
//! Hardware and API failures travel as `Result`s. Violations of usage
//! contracts (illegal state on a queue, unbound pipeline at draw time, a
//! descriptor table written past its end) go through [`rhi_check!`]: the
//! message is logged at error level and the process panics in debug builds.
//! Release builds compile the check out entirely.

/// Checks a usage invariant.
///
/// ```rust
/// use keel_core::rhi_check;
///
/// let groups = 64u32;
/// rhi_check!(groups <= 65535, "dispatch group count {} exceeds the limit", groups);
/// ```
#[macro_export]
macro_rules! rhi_check {
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(debug_assertions) && !($cond) {
            let message = format!($($arg)+);
            $crate::__log::error!("{}", message);
            panic!("{}", message);
        }
    };
}

/// Reports an unconditional usage violation.
///
/// Unlike [`rhi_check!`] this is not compiled out: it is reserved for states
/// the caller cannot recover from.
#[macro_export]
macro_rules! rhi_fatal {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        $crate::__log::error!("{}", message);
        panic!("{}", message);
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn passing_check_is_silent() {
        rhi_check!(1 + 1 == 2, "arithmetic is broken");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "resource 'Foo' is in an illegal state")]
    fn failing_check_panics_in_debug() {
        let name = "Foo";
        rhi_check!(false, "resource '{}' is in an illegal state", name);
    }

    #[test]
    #[should_panic(expected = "device lost")]
    fn fatal_always_panics() {
        rhi_fatal!("device lost");
    }
}
