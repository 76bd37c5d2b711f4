//! Solidity `abi.encode` as a [serde::Serializer].
//!
//! Mapping of Rust types:
//! - unsigned and signed integers: `uintN`/`intN`, right aligned, signed values
//!   are sign extended to the full slot
//! - `bool`: `uint8`
//! - `str`/`String`: `string`
//! - structs and tuples: `tuple`, dynamic if any member is dynamic
//! - `Vec<T>`/`&[T]`: `T[]`
//! - `[T; N]`: `T[N]`
//! - values calling `serialize_bytes` write their bytes as-is, padded to a
//!   multiple of [SLOT_SIZE]. This is how `bytes32`, `address`, `uint256` and
//!   `int256` are represented (see [super::types]).
//!
//! Solidity `bytes` (dynamic) is not supported. Encoding happens in two passes
//! for every dynamic value: the head (static values and offsets) and the tail
//! (the dynamic data the offsets point to). Sizes are computed with dry runs
//! that don't write anything.

use super::error::{Error, Result};
use serde::{
    ser::{self, Impossible, SerializeSeq, SerializeStruct, SerializeTuple, SerializeTupleStruct},
    Serialize,
};
use tracing::trace;

pub const SLOT_SIZE: usize = 32; // bytes

pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

/// Used for the size passes, which must never produce output.
struct NoWriter;

impl Writer for NoWriter {
    fn write(&mut self, _: &[u8]) {
        unreachable!("size passes do not write");
    }
}

#[derive(Debug)]
enum Pass {
    // Don't serialize, just calculate the length of the head and whether the
    // type is dynamic. We need the head size to calculate offsets for dynamic
    // types and we need to know if the type is dynamic to begin with
    // Pass::Head. is_dynamic is stored outside of Pass because it is needed by
    // all passes.
    HeadSize(usize),
    // Write the static part, `offset` is where the next dynamic value starts.
    Head { offset: usize },
    TailSize(usize),
    // Write the dynamic part.
    Tail,
}

pub struct Serializer<'a, W>
where
    W: Writer,
{
    writer: &'a mut W,
    pass: Pass,
    is_dynamic: bool,
}

/// Encode `value` like `abi.encode(value)` and hand the 32 byte slots to
/// `writer`.
///
/// A dynamic value is prefixed with its offset (`0x20`), a struct with only
/// static members is encoded like the list of its members.
pub fn to_writer<T, W>(value: &T, writer: &mut W) -> Result<()>
where
    T: Serialize + ?Sized,
    W: Writer,
{
    let (head_size, is_dynamic) = compute_size(value)?;

    let mut serializer = Serializer {
        writer,
        pass: Pass::Head { offset: head_size },
        is_dynamic,
    };

    if is_dynamic {
        serializer.write_right_aligned(SLOT_SIZE.to_be_bytes());
    }

    value.serialize(&mut serializer)?;
    if is_dynamic {
        serializer.pass = Pass::Tail;
        value.serialize(&mut serializer)?;
    }
    Ok(())
}

/// Convenience wrapper around [to_writer] collecting the output.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    to_writer(value, &mut buf)?;
    Ok(buf)
}

fn compute_size<T>(value: &T) -> Result<(usize, bool)>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::HeadSize(0),
        is_dynamic: false,
    };
    value.serialize(&mut serializer)?;

    match serializer.pass {
        Pass::HeadSize(head_size) => Ok((head_size, serializer.is_dynamic)),
        _ => unreachable!("the serializer never changes the pass of a size run"),
    }
}

fn compute_tail_size<T>(value: &T) -> Result<usize>
where
    T: Serialize + ?Sized,
{
    let mut serializer = Serializer {
        writer: &mut NoWriter,
        pass: Pass::TailSize(0),
        is_dynamic: false,
    };
    value.serialize(&mut serializer)?;

    match serializer.pass {
        Pass::TailSize(tail_size) => Ok(tail_size),
        _ => unreachable!("the serializer never changes the pass of a size run"),
    }
}

/// Number of bytes `len` bytes occupy once padded to full slots.
fn padded_len(len: usize) -> usize {
    let r = len % SLOT_SIZE;
    (len - r) + if r == 0 { 0 } else { SLOT_SIZE }
}

impl<'a, W> Serializer<'a, W>
where
    W: Writer,
{
    // Panics if v.len() > SLOT_SIZE
    fn write_left_aligned_slice(&mut self, v: &[u8]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[..v.len()].copy_from_slice(v);
        self.writer.write(bytes.as_slice());
    }

    // Panics if N > SLOT_SIZE
    fn write_right_aligned<const N: usize>(&mut self, v: [u8; N]) {
        self.write_signed(false, v)
    }

    // Panics if N > SLOT_SIZE
    fn write_signed<const N: usize>(&mut self, negative: bool, v: [u8; N]) {
        let filler = if negative { 0xff } else { 0x00 };
        let mut bytes = [filler; SLOT_SIZE];
        bytes[SLOT_SIZE - N..].copy_from_slice(v.as_slice());
        self.writer.write(bytes.as_slice())
    }

    /// Writes `len` bytes in full slots, the last one padded with zeros.
    fn write_padded(&mut self, v: &[u8]) {
        let iter = v.chunks_exact(SLOT_SIZE);
        let rem = iter.remainder();
        for chunk in iter {
            self.writer.write(chunk);
        }
        if !rem.is_empty() {
            self.write_left_aligned_slice(rem);
        }
    }

    /// Integers and bools: one slot in the head, nothing in the tail.
    fn static_slot<const N: usize>(&mut self, negative: bool, v: [u8; N]) {
        match self.pass {
            Pass::HeadSize(ref mut head_size) => *head_size += SLOT_SIZE,
            Pass::Head { .. } => self.write_signed(negative, v),
            Pass::TailSize(_) | Pass::Tail => {}
        }
    }

    fn serialize_in<T>(&mut self, value: &T, pass: Pass) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (_, is_dynamic) = compute_size(value)?;
        let mut serializer = Serializer {
            writer: self.writer,
            pass,
            is_dynamic,
        };
        value.serialize(&mut serializer)
    }

    // Tuples and structs: write the entire member in Pass::Head if it is
    // static, otherwise write its offset in Pass::Head and its content in
    // Pass::Tail.
    fn serialize_tuple_element<T>(&mut self, name: Option<&'static str>, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.pass {
            Pass::HeadSize(head_size) => {
                let (size, is_dyn) = compute_size(value)?;
                self.pass = Pass::HeadSize(head_size + if is_dyn { SLOT_SIZE } else { size });
                self.is_dynamic |= is_dyn;
                Ok(())
            }
            Pass::Head { offset } => {
                let (field_head_size, is_dyn) = compute_size(value)?;
                if is_dyn {
                    self.write_right_aligned(offset.to_be_bytes());
                    trace!(field = name.unwrap_or("_"), offset, "abi offset");
                    self.pass = Pass::Head {
                        offset: offset + field_head_size + compute_tail_size(value)?,
                    };
                    Ok(())
                } else {
                    self.serialize_in(value, Pass::Head { offset })
                }
            }
            Pass::TailSize(size) => {
                let (field_head_size, is_dyn) = compute_size(value)?;
                let field_tail_size = compute_tail_size(value)?;
                self.pass = Pass::TailSize(
                    size + if is_dyn { field_head_size } else { 0 } + field_tail_size,
                );
                Ok(())
            }
            Pass::Tail => {
                let (field_head_size, is_dyn) = compute_size(value)?;
                if is_dyn {
                    // The offset given here does not affect the sequence this
                    // element is part of but all children of the element: they
                    // need to know where their own tail begins.
                    self.serialize_in(
                        value,
                        Pass::Head {
                            offset: field_head_size,
                        },
                    )?;
                    self.serialize_in(value, Pass::Tail)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn serialize_seq_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.pass {
            Pass::HeadSize(head_size) => {
                let (element_head_size, is_dyn) = compute_size(value)?;
                self.pass = Pass::HeadSize(
                    head_size
                        + if is_dyn {
                            SLOT_SIZE
                        } else {
                            element_head_size
                        },
                );
                Ok(())
            }
            Pass::Head { offset } => {
                // Element offsets are relative to the first element, the
                // length slot is not part of them.
                let seq_offset = offset - SLOT_SIZE;
                let (element_head_size, is_dyn) = compute_size(value)?;
                if is_dyn {
                    self.write_right_aligned(seq_offset.to_be_bytes());
                    trace!(offset = seq_offset, "abi element offset");
                    self.pass = Pass::Head {
                        offset: offset + element_head_size + compute_tail_size(value)?,
                    };
                    Ok(())
                } else {
                    self.serialize_in(
                        value,
                        Pass::Head {
                            offset: element_head_size,
                        },
                    )
                }
            }
            Pass::TailSize(size) => {
                let (element_head_size, is_dyn) = compute_size(value)?;
                let element_tail_size = compute_tail_size(value)?;
                self.pass = Pass::TailSize(
                    size + if is_dyn { element_head_size } else { 0 } + element_tail_size,
                );
                Ok(())
            }
            Pass::Tail => {
                let (element_head_size, is_dyn) = compute_size(value)?;
                if is_dyn {
                    self.serialize_in(
                        value,
                        Pass::Head {
                            offset: element_head_size,
                        },
                    )?;
                    self.serialize_in(value, Pass::Tail)
                } else {
                    Ok(())
                }
            }
        }
    }
}

macro_rules! serialize_unsigned {
    ($($method:ident: $T:ty),*) => {
        $(
            fn $method(self, v: $T) -> Result<()> {
                self.static_slot(false, v.to_be_bytes());
                Ok(())
            }
        )*
    };
}

macro_rules! serialize_signed {
    ($($method:ident: $T:ty),*) => {
        $(
            fn $method(self, v: $T) -> Result<()> {
                self.static_slot(v < 0, v.to_be_bytes());
                Ok(())
            }
        )*
    };
}

impl<'a, 'b, W> ser::Serializer for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Impossible<(), Error>;
    type SerializeMap = Impossible<(), Error>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Impossible<(), Error>;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.serialize_u8(u8::from(v))
    }

    serialize_unsigned!(
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128
    );

    serialize_signed!(
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128
    );

    fn serialize_f32(self, _: f32) -> Result<()> {
        Err(Error::TypeNotRepresentable("f32"))
    }

    fn serialize_f64(self, _: f64) -> Result<()> {
        Err(Error::TypeNotRepresentable("f64"))
    }

    fn serialize_char(self, _: char) -> Result<()> {
        Err(Error::TypeNotYetSupported("char"))
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        match self.pass {
            Pass::HeadSize(_) => {
                self.is_dynamic = true;
            }
            Pass::Head { .. } => {}
            Pass::TailSize(ref mut size) => {
                //       length    + data
                *size += SLOT_SIZE + padded_len(v.len());
            }
            Pass::Tail => {
                self.write_right_aligned(v.len().to_be_bytes());
                self.write_padded(v.as_bytes());
            }
        };
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        match self.pass {
            Pass::HeadSize(ref mut head_size) => *head_size += padded_len(v.len()),
            Pass::Head { .. } => self.write_padded(v),
            Pass::TailSize(_) | Pass::Tail => {}
        }
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("none"))
    }

    fn serialize_some<T>(self, _: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("some"))
    }

    fn serialize_unit(self) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit"))
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit struct"))
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<()> {
        Err(Error::TypeNotRepresentable("unit variant (enum)"))
    }

    // Solidity has no newtypes, they are encoded like the wrapped value.
    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Err(Error::TypeNotRepresentable("newtype variant (enum)"))
    }

    fn serialize_seq(self, size: Option<usize>) -> Result<Self::SerializeSeq> {
        // The length has to be written before the elements, which means we
        // can't encode sequences that don't know their size in advance.
        let size = size.ok_or(Error::UnknownLength)?;
        match self.pass {
            Pass::HeadSize(ref mut head_size) => {
                self.is_dynamic = true;
                *head_size += SLOT_SIZE;
            }
            Pass::Head { .. } => {
                self.write_right_aligned(size.to_be_bytes());
            }
            Pass::TailSize(_) | Pass::Tail => {}
        }
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::TypeNotRepresentable("struct variant"))
    }
}

impl<'a, 'b, W> SerializeSeq for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_seq_element(value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTuple for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(None, value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeTupleStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(None, value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b, W> SerializeStruct for &'a mut Serializer<'b, W>
where
    W: Writer,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.serialize_tuple_element(Some(name), value)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}
