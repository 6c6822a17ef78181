//! Binary wire format for partial and final results.
//!
//! All integers are little-endian. A payload starts with [`WIRE_FORMAT_MAGIC_VERSION`].
//!
//! ```text
//! container := u32 count, count * (name, u8 tag, payload)
//! matrix    := u32 bucket_count, bucket_count * (key, u64 doc_count, container), trailer
//! trailer   := u16 field_count, field_count * (u16 tag, u32 len, len bytes)
//! string    := u32 len, len bytes of UTF-8
//! ```
//!
//! Trailer field 1 holds the matrix metadata as a JSON object. Field 2 holds the
//! universe length as a `u32` and is only written when the matrix carries buckets
//! past its universe. Readers skip trailer fields they do not know.

use std::io::{self, Cursor, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};
use shardagg_common::{Result, error::Error, verify_data};

use crate::{
    aggregation::{InternalAggregation, InternalAggregations, InternalMetric, Metadata, MetricValue},
    matrix::{Bucket, InternalAdjacencyMatrix},
};

pub const WIRE_FORMAT_MAGIC_VERSION: u32 = 0x5341_4731;

/// Containers may nest at most this deep.
pub const MAX_NESTING_DEPTH: usize = 64;

const TAG_ADJACENCY_MATRIX: u8 = 1;
const TAG_SUM: u8 = 2;
const TAG_MIN: u8 = 3;
const TAG_MAX: u8 = 4;
const TAG_VALUE_COUNT: u8 = 5;

const FIELD_METADATA: u16 = 1;
const FIELD_UNIVERSE_LEN: u16 = 2;

/// Smallest encoding of one bucket: empty key, doc count, empty container.
const MIN_BUCKET_LEN: usize = 4 + 8 + 4;
/// Smallest encoding of one container entry: empty name, tag.
const MIN_ENTRY_LEN: usize = 4 + 1;

pub fn encode_aggregations(aggregations: &InternalAggregations) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u32::<LE>(WIRE_FORMAT_MAGIC_VERSION)?;
    write_container(&mut buf, aggregations)?;
    Ok(buf)
}

pub fn decode_aggregations(bytes: &[u8]) -> Result<InternalAggregations> {
    let mut reader = WireReader::new(bytes)?;
    let aggregations = reader.container(0)?;
    reader.finish()?;
    Ok(aggregations)
}

pub fn encode_matrix(matrix: &InternalAdjacencyMatrix) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u32::<LE>(WIRE_FORMAT_MAGIC_VERSION)?;
    write_str(&mut buf, matrix.name())?;
    write_matrix_body(&mut buf, matrix)?;
    Ok(buf)
}

pub fn decode_matrix(bytes: &[u8]) -> Result<InternalAdjacencyMatrix> {
    let mut reader = WireReader::new(bytes)?;
    let name = reader.string("matrix name")?;
    let matrix = reader.matrix_body(name, 0)?;
    reader.finish()?;
    Ok(matrix)
}

fn write_container<W: Write>(w: &mut W, aggregations: &InternalAggregations) -> Result<()> {
    w.write_u32::<LE>(len_u32(aggregations.len(), "aggregation count")?)?;
    for aggregation in aggregations {
        write_str(w, aggregation.name())?;
        match aggregation {
            InternalAggregation::AdjacencyMatrix(matrix) => {
                w.write_u8(TAG_ADJACENCY_MATRIX)?;
                write_matrix_body(w, matrix)?;
            }
            InternalAggregation::Metric(metric) => write_metric(w, metric.value())?,
        }
    }
    Ok(())
}

fn write_matrix_body<W: Write>(w: &mut W, matrix: &InternalAdjacencyMatrix) -> Result<()> {
    w.write_u32::<LE>(len_u32(matrix.buckets().len(), "bucket count")?)?;
    for bucket in matrix.buckets() {
        write_str(w, bucket.key())?;
        w.write_u64::<LE>(bucket.doc_count())?;
        write_container(w, bucket.aggregations())?;
    }

    let metadata = matrix.metadata().map(serde_json::to_vec).transpose()?;
    let has_extras = matrix.universe_len() < matrix.buckets().len();
    w.write_u16::<LE>(u16::from(metadata.is_some()) + u16::from(has_extras))?;
    if let Some(json) = metadata {
        w.write_u16::<LE>(FIELD_METADATA)?;
        w.write_u32::<LE>(len_u32(json.len(), "metadata")?)?;
        w.write_all(&json)?;
    }
    if has_extras {
        w.write_u16::<LE>(FIELD_UNIVERSE_LEN)?;
        w.write_u32::<LE>(4)?;
        w.write_u32::<LE>(len_u32(matrix.universe_len(), "universe length")?)?;
    }
    Ok(())
}

fn write_metric<W: Write>(w: &mut W, value: &MetricValue) -> io::Result<()> {
    match *value {
        MetricValue::Sum(sum) => {
            w.write_u8(TAG_SUM)?;
            w.write_f64::<LE>(sum)
        }
        MetricValue::Min(min) => {
            w.write_u8(TAG_MIN)?;
            write_opt_f64(w, min)
        }
        MetricValue::Max(max) => {
            w.write_u8(TAG_MAX)?;
            write_opt_f64(w, max)
        }
        MetricValue::ValueCount(count) => {
            w.write_u8(TAG_VALUE_COUNT)?;
            w.write_u64::<LE>(count)
        }
    }
}

fn write_opt_f64<W: Write>(w: &mut W, value: Option<f64>) -> io::Result<()> {
    match value {
        Some(value) => {
            w.write_u8(1)?;
            w.write_f64::<LE>(value)
        }
        None => w.write_u8(0),
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_u32::<LE>(len_u32(s.len(), "string")?)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn len_u32(len: usize, element: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::invalid_arg(element, format!("length {len} does not fit the wire format")))
}

/// Bounds-checked reader over a complete payload.
struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<WireReader<'a>> {
        let mut reader = WireReader {
            cursor: Cursor::new(bytes),
        };
        let magic = reader.u32("header")?;
        if magic != WIRE_FORMAT_MAGIC_VERSION {
            return Err(Error::serialization(
                "header",
                format!("unexpected signature {magic:#010x}"),
            ));
        }
        Ok(reader)
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn finish(self) -> Result<()> {
        let remaining = self.remaining();
        if remaining != 0 {
            return Err(Error::serialization(
                "payload",
                format!("{remaining} trailing bytes"),
            ));
        }
        Ok(())
    }

    fn container(&mut self, depth: usize) -> Result<InternalAggregations> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::serialization(
                "container",
                format!("nesting deeper than {MAX_NESTING_DEPTH}"),
            ));
        }
        let count = self.u32("aggregation count")? as usize;
        verify_data!(aggregation_count, count <= self.remaining() / MIN_ENTRY_LEN);

        let mut aggregations = InternalAggregations::empty();
        for _ in 0..count {
            let name = self.string("aggregation name")?;
            if aggregations.get(&name).is_some() {
                return Err(Error::serialization(
                    "aggregation name",
                    format!("duplicate aggregation name '{name}'"),
                ));
            }
            let aggregation: InternalAggregation = match self.u8("aggregation tag")? {
                TAG_ADJACENCY_MATRIX => self.matrix_body(name, depth)?.into(),
                TAG_SUM => InternalMetric::new(name, MetricValue::Sum(self.f64("sum")?)).into(),
                TAG_MIN => InternalMetric::new(name, MetricValue::Min(self.opt_f64("min")?)).into(),
                TAG_MAX => InternalMetric::new(name, MetricValue::Max(self.opt_f64("max")?)).into(),
                TAG_VALUE_COUNT => {
                    InternalMetric::new(name, MetricValue::ValueCount(self.u64("value_count")?))
                        .into()
                }
                tag => {
                    return Err(Error::serialization(
                        "aggregation tag",
                        format!("unknown aggregation tag {tag}"),
                    ));
                }
            };
            aggregations.push(aggregation)?;
        }
        Ok(aggregations)
    }

    fn matrix_body(&mut self, name: String, depth: usize) -> Result<InternalAdjacencyMatrix> {
        let count = self.u32("bucket count")? as usize;
        verify_data!(bucket_count, count <= self.remaining() / MIN_BUCKET_LEN);

        let mut buckets = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.string("bucket key")?;
            let doc_count = self.u64("doc_count")?;
            let aggregations = self.container(depth + 1)?;
            buckets.push(Bucket::new(key, doc_count, aggregations));
        }

        let mut metadata = None;
        let mut universe_len = count;
        let field_count = self.u16("trailer field count")?;
        for _ in 0..field_count {
            let tag = self.u16("trailer field tag")?;
            let len = self.u32("trailer field length")? as usize;
            let bytes = self.bytes(len, "trailer field")?;
            match tag {
                FIELD_METADATA => {
                    let parsed = serde_json::from_slice::<Metadata>(bytes).map_err(|e| {
                        Error::serialization("metadata", e.to_string())
                    })?;
                    metadata = Some(parsed);
                }
                FIELD_UNIVERSE_LEN => {
                    verify_data!(universe_len_field, bytes.len() == 4);
                    let mut field = bytes;
                    universe_len = field.read_u32::<LE>()? as usize;
                    verify_data!(universe_len, universe_len <= count);
                }
                _ => log::warn!("matrix '{name}': skipping unknown trailer field {tag} ({len} bytes)"),
            }
        }
        Ok(InternalAdjacencyMatrix::new(name, buckets, metadata).with_universe_len(universe_len))
    }

    fn string(&mut self, element: &str) -> Result<String> {
        let len = self.u32(element)? as usize;
        let bytes = self.bytes(len, element)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::serialization(element, format!("invalid UTF-8: {e}")))
    }

    fn bytes(&mut self, len: usize, element: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(truncated(element));
        }
        let start = self.cursor.position() as usize;
        let slice: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&slice[start..start + len])
    }

    fn opt_f64(&mut self, element: &str) -> Result<Option<f64>> {
        match self.u8(element)? {
            0 => Ok(None),
            1 => self.f64(element).map(Some),
            flag => Err(Error::serialization(
                element,
                format!("invalid presence flag {flag}"),
            )),
        }
    }

    fn u8(&mut self, element: &str) -> Result<u8> {
        self.cursor.read_u8().map_err(|e| read_error(element, e))
    }

    fn u16(&mut self, element: &str) -> Result<u16> {
        self.cursor.read_u16::<LE>().map_err(|e| read_error(element, e))
    }

    fn u32(&mut self, element: &str) -> Result<u32> {
        self.cursor.read_u32::<LE>().map_err(|e| read_error(element, e))
    }

    fn u64(&mut self, element: &str) -> Result<u64> {
        self.cursor.read_u64::<LE>().map_err(|e| read_error(element, e))
    }

    fn f64(&mut self, element: &str) -> Result<f64> {
        self.cursor.read_f64::<LE>().map_err(|e| read_error(element, e))
    }
}

fn truncated(element: &str) -> Error {
    Error::serialization(element, "unexpected end of payload")
}

fn read_error(element: &str, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        truncated(element)
    } else {
        Error::serialization(element, err.to_string())
    }
}
