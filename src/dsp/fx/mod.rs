//! Effects processing q31 audio in place.

pub mod delay;
pub mod table_shaper;
