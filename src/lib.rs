//! Promise chains that can be settled from any thread.
//!
//! A chain starts with [`Chain::begin`] or [`Chain::begin_with`]. Each
//! [`then`](Chain::then) adds a stage whose task body gets a [`Reporter`] and
//! the previous stage's value; the body settles its stage through the reporter,
//! right away or later from another thread. [`catch`](Chain::catch) attaches an
//! error handler and hands back the same node, so a node can fan out into
//! several branches. Nothing here owns a thread: stages run on whichever
//! thread settles the stage before them, or on the registering thread if that
//! already happened.
//!
//! ```
//! use promise_chain::{Chain, Reporter};
//! use std::thread;
//! use std::time::Duration;
//!
//! let first = Chain::<i32, String>::begin(1)
//!     .then(|p, i| {
//!         thread::spawn(move || {
//!             thread::sleep(Duration::from_millis(10));
//!             p.resolve(i + 1);
//!         });
//!         Ok(())
//!     })
//!     .catch(|e| panic!("not reached: {e}"));
//!
//! let ok = first.then(|p, i| { p.resolve(i * 10); Ok(()) });
//! let failed = first
//!     .then(|p: Reporter<i32, String>, i| { p.reject(format!("no {i}")); Ok(()) })
//!     .then(|_p: Reporter<i32, String>, _| unreachable!());
//!
//! assert_eq!(ok.wait(), Ok(20));
//! assert_eq!(failed.wait(), Err("no 2".to_owned()));
//! ```

mod chain;
mod error;
mod runner;
mod settle;

pub use chain::Chain;
pub use error::TaskError;
pub use runner::Reporter;
pub use settle::{SettleBox, SettleState, Settled};
