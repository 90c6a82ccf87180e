use std::error::Error;
use std::marker::PhantomData;
use std::ops::Deref;

pub type BoxedError = Box<dyn Error + Sync + Send>;

/// Encoded bytes, either borrowed from the item or freshly built.
pub enum CowBytes<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl<'a> CowBytes<'a> {
    pub fn borrowed(item: &'a [u8]) -> Self {
        CowBytes::Borrowed(item)
    }

    pub fn owned(item: impl Into<Vec<u8>>) -> Self {
        CowBytes::Owned(item.into())
    }
}

impl AsRef<[u8]> for CowBytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Deref for CowBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            CowBytes::Borrowed(item) => item,
            CowBytes::Owned(item) => item,
        }
    }
}

/// Trait for encoding types into byte representation
pub trait BytesEncode<'a> {
    type EItem: 'a + ?Sized;

    /// Encode an item into bytes
    fn bytes_encode(item: &'a Self::EItem) -> Result<CowBytes<'a>, BoxedError>;
}

/// Trait for decoding types from byte representation.
///
/// The store hands out copies of its records, so decoded items own their data.
pub trait BytesDecode {
    type DItem;

    /// Decode bytes into an item
    fn bytes_decode(bytes: &[u8]) -> Result<Self::DItem, BoxedError>;
}

/// Wrapper for native types that can be represented as bytes (numbers, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Native<T>(PhantomData<T>);

impl<T> Default for Native<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

/// Wrapper for slices of native types, encodes `[T]` and decodes to `Vec<T>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PodSlice<T>(PhantomData<T>);

impl<T> Default for PodSlice<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

/// Wrapper for string types, encodes `str` and decodes to `String`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Str;

/// Wrapper for byte slice types, encodes `[u8]` and decodes to `Vec<u8>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bytes;

impl<'a, T> BytesEncode<'a> for Native<T>
where
    T: bytemuck::Pod,
{
    type EItem = T;

    fn bytes_encode(item: &'a Self::EItem) -> Result<CowBytes<'a>, BoxedError> {
        Ok(CowBytes::Borrowed(bytemuck::bytes_of(item)))
    }
}

impl<T> BytesDecode for Native<T>
where
    T: bytemuck::Pod,
{
    type DItem = T;

    fn bytes_decode(bytes: &[u8]) -> Result<Self::DItem, BoxedError> {
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(format!(
                "Invalid byte length for {}: expected {}, got {}",
                std::any::type_name::<T>(),
                std::mem::size_of::<T>(),
                bytes.len()
            )
            .into());
        }
        // record bytes carry no alignment guarantee
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

impl<'a, T> BytesEncode<'a> for PodSlice<T>
where
    T: bytemuck::Pod,
{
    type EItem = [T];

    fn bytes_encode(item: &'a Self::EItem) -> Result<CowBytes<'a>, BoxedError> {
        Ok(CowBytes::Borrowed(bytemuck::cast_slice(item)))
    }
}

impl<T> BytesDecode for PodSlice<T>
where
    T: bytemuck::Pod,
{
    type DItem = Vec<T>;

    fn bytes_decode(bytes: &[u8]) -> Result<Self::DItem, BoxedError> {
        let width = std::mem::size_of::<T>();
        if width == 0 || bytes.len() % width != 0 {
            return Err(format!(
                "Invalid byte length for [{}]: {} is not a multiple of {}",
                std::any::type_name::<T>(),
                bytes.len(),
                width
            )
            .into());
        }
        Ok(bytes
            .chunks_exact(width)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

impl<'a> BytesEncode<'a> for Str {
    type EItem = str;

    fn bytes_encode(item: &'a Self::EItem) -> Result<CowBytes<'a>, BoxedError> {
        Ok(CowBytes::Borrowed(item.as_bytes()))
    }
}

impl BytesDecode for Str {
    type DItem = String;

    fn bytes_decode(bytes: &[u8]) -> Result<Self::DItem, BoxedError> {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }
}

impl<'a> BytesEncode<'a> for Bytes {
    type EItem = [u8];

    fn bytes_encode(item: &'a Self::EItem) -> Result<CowBytes<'a>, BoxedError> {
        Ok(CowBytes::Borrowed(item))
    }
}

impl BytesDecode for Bytes {
    type DItem = Vec<u8>;

    fn bytes_decode(bytes: &[u8]) -> Result<Self::DItem, BoxedError> {
        Ok(bytes.to_vec())
    }
}
