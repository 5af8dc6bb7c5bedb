//! The kunquat composition store.
//!
//! Compositions live in a flat key/value map (`Store`). Each key follows a
//! template (`pat_000/col_00/p_triggers.json`, `au_00/proc_00/c/...`) that
//! decides how its bytes are parsed; `Views` turns the entries into shared
//! `kq_ir` model types and `validate` checks them as a whole.

pub mod key;
pub mod schema;
pub mod store;
pub mod validate;
pub mod value;
pub mod view;
pub mod wav;

pub use key::{classify, validate_key, DirtyTag, KeyKind, Suffix, KEY_MAX};
pub use schema::parse_event;
pub use store::{Progress, Store, Transaction};
pub use validate::validate;
pub use value::{Entry, Value};
pub use view::Views;
pub use wav::WavFormat;
