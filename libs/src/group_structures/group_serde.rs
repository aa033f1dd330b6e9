use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, Compress, SerializationError, Validate};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serializer};
use std::io::{Read, Write};

/// Encoded size of a point (or any canonical value) under `compress`.
pub fn encoded_size<P: CanonicalSerialize + Default>(compress: Compress) -> usize {
    P::default().serialized_size(compress)
}

pub fn write_point<W: Write, P: CanonicalSerialize>(
    writer: &mut W,
    point: &P,
    compress: Compress,
) -> Result<(), SerializationError> {
    point.serialize_with_mode(writer, compress)
}

/// Decodes a point and checks that it lies on the curve and in the prime
/// order subgroup.
pub fn read_point<R: Read, P: CanonicalDeserialize>(
    reader: &mut R,
    compress: Compress,
) -> Result<P, SerializationError> {
    P::deserialize_with_mode(reader, compress, Validate::Yes)
}

pub fn point_to_hex<P: CanonicalSerialize>(point: &P) -> String {
    let mut buf = Vec::with_capacity(point.serialized_size(Compress::Yes));
    // Writing into a Vec cannot fail.
    let _ = point.serialize_with_mode(&mut buf, Compress::Yes);
    hex::encode(buf)
}

pub fn point_from_hex<P: CanonicalDeserialize>(s: &str) -> Result<P, SerializationError> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|_| SerializationError::InvalidData)?;
    P::deserialize_with_mode(bytes.as_slice(), Compress::Yes, Validate::Yes)
}

/// serde helpers writing points as compressed hex strings, for JSON exports.
pub fn serialize_point<S: Serializer, P: CanonicalSerialize>(point: &P, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&point_to_hex(point))
}

pub fn deserialize_point<'de, D: Deserializer<'de>, P: CanonicalDeserialize>(d: D) -> Result<P, D::Error> {
    let s = String::deserialize(d)?;
    point_from_hex(&s).map_err(|e| D::Error::custom(format!("invalid point: {}", e)))
}

pub fn serialize_points<S: Serializer, P: CanonicalSerialize>(points: &[P], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(points.len()))?;
    for p in points {
        seq.serialize_element(&point_to_hex(p))?;
    }
    seq.end()
}

pub fn deserialize_points<'de, D: Deserializer<'de>, P: CanonicalDeserialize>(d: D) -> Result<Vec<P>, D::Error> {
    let raw = Vec::<String>::deserialize(d)?;
    raw.iter()
        .map(|s| point_from_hex(s).map_err(|e| D::Error::custom(format!("invalid point: {}", e))))
        .collect()
}
