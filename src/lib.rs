//! Scalar reverse-mode automatic differentiation on a tape.
//!
//! ```
//! use scalargrad::Tape;
//!
//! let tape = Tape::new();
//! let a = tape.term("a", 2.);
//! let c = a * a + a;
//! c.backward().unwrap();
//! assert_eq!(a.grad(), 5.);
//! ```

mod dot;
pub mod error;
pub mod tape;

pub use dot::DotBuilder;
pub use error::GraphError;
pub use tape::{Op, Tape, TapeNode, TapeTerm};

#[cfg(feature = "macro")]
pub use scalargrad_macro::scalargrad;
