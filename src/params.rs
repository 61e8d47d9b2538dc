//! Persistence contract for parameter structs.
//!
//! Preset storage is handled outside of this crate. Each persistent struct
//! writes its fields as named integer attributes and recognises its own tags
//! when a preset is read back. Fields that never appear keep their defaults.

/// Sink for named integer attributes.
pub trait ParamWriter {
    fn write_attribute(&mut self, name: &str, value: i32);
}

/// Source of the value belonging to the tag currently being read.
pub trait ParamReader {
    fn read_value(&mut self) -> i32;
}

pub trait PersistentParams {
    /// Writes every field that differs from its default.
    fn write_params<W: ParamWriter>(&self, writer: &mut W);

    /// Consumes the value of `tag` if it belongs to this struct.
    ///
    /// Returns `false` without touching the reader for unknown tags.
    fn read_param<R: ParamReader>(&mut self, tag: &str, reader: &mut R) -> bool;
}

/// Writes a float scaled to an integer, e.g. a phase stored in tenths.
pub(crate) fn write_scaled<W: ParamWriter>(writer: &mut W, name: &str, value: f32, scale: f32) {
    writer.write_attribute(name, (value * scale) as i32);
}

pub(crate) fn read_scaled<R: ParamReader>(reader: &mut R, scale: f32) -> f32 {
    reader.read_value() as f32 / scale
}
