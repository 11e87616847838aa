//! Reader for one-dimensional NumPy structured arrays (`.npy` layout), the container format of
//! cryoSPARC `.cs` files.

use super::MetadataError;
use ndarray::Array2;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    F4,
    F8,
    I4,
    I8,
    U1,
    U4,
    U8,
    /// Fixed-width byte string of the given length.
    Bytes(usize),
}

impl ScalarType {
    fn size(self) -> usize {
        match self {
            ScalarType::U1 => 1,
            ScalarType::F4 | ScalarType::I4 | ScalarType::U4 => 4,
            ScalarType::F8 | ScalarType::I8 | ScalarType::U8 => 8,
            ScalarType::Bytes(n) => n,
        }
    }

    fn parse(descr: &str) -> Result<(Self, bool), MetadataError> {
        let (order, code) = descr.split_at(descr.len().min(1));
        let little_endian = match order {
            "<" | "|" | "=" => true,
            ">" => false,
            _ => return Err(MetadataError::Npy(format!("unsupported type '{}'", descr))),
        };
        let scalar = match code {
            "f4" => ScalarType::F4,
            "f8" => ScalarType::F8,
            "i4" => ScalarType::I4,
            "i8" => ScalarType::I8,
            "u1" => ScalarType::U1,
            "u4" => ScalarType::U4,
            "u8" => ScalarType::U8,
            s if s.starts_with('S') => ScalarType::Bytes(
                s[1..]
                    .parse()
                    .map_err(|_| MetadataError::Npy(format!("invalid string type '{}'", descr)))?,
            ),
            _ => return Err(MetadataError::Npy(format!("unsupported type '{}'", descr))),
        };
        Ok((scalar, little_endian))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub scalar: ScalarType,
    pub little_endian: bool,
    /// Sub-array shape; empty for scalar fields.
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl Field {
    fn count(&self) -> usize {
        self.shape.iter().product()
    }

    fn size(&self) -> usize {
        self.scalar.size() * self.count()
    }
}

/// A parsed structured array: packed records of named fields.
#[derive(Debug, Clone)]
pub struct RecordArray {
    pub fields: Vec<Field>,
    pub record_size: usize,
    pub len: usize,
    data: Vec<u8>,
}

impl RecordArray {
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        if bytes.len() < 10 || &bytes[..6] != MAGIC {
            return Err(MetadataError::Npy("missing \\x93NUMPY magic".to_string()));
        }
        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(MetadataError::Npy("truncated header".to_string()));
                }
                (
                    u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                    12,
                )
            }
            v => return Err(MetadataError::Npy(format!("unsupported format version {}", v))),
        };
        let header_end = header_start + header_len;
        let header = bytes
            .get(header_start..header_end)
            .ok_or_else(|| MetadataError::Npy("truncated header".to_string()))?;
        let header = std::str::from_utf8(header)
            .map_err(|_| MetadataError::Npy("header is not valid text".to_string()))?;

        let dict = HeaderParser::new(header).parse_dict()?;
        let descr = dict
            .iter()
            .find(|(k, _)| k == "descr")
            .map(|(_, v)| v)
            .ok_or_else(|| MetadataError::Npy("header lacks 'descr'".to_string()))?;
        if let Some((_, Value::Bool(true))) = dict.iter().find(|(k, _)| k == "fortran_order") {
            return Err(MetadataError::Npy("Fortran-ordered arrays are not supported".to_string()));
        }
        let shape = match dict.iter().find(|(k, _)| k == "shape").map(|(_, v)| v) {
            Some(Value::Tuple(items)) => items
                .iter()
                .map(Value::as_usize)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| MetadataError::Npy("invalid shape".to_string()))?,
            _ => return Err(MetadataError::Npy("header lacks 'shape'".to_string())),
        };
        if shape.len() != 1 {
            return Err(MetadataError::Npy(format!(
                "expected a one-dimensional record array, found shape {:?}",
                shape
            )));
        }

        let fields = fields_from_descr(descr)?;
        let record_size = fields.iter().map(Field::size).sum();
        let len = shape[0];
        let data = bytes[header_end..].to_vec();
        if data.len() < record_size * len {
            return Err(MetadataError::Npy(format!(
                "expected {} bytes of records, found {}",
                record_size * len,
                data.len()
            )));
        }
        Ok(Self {
            fields,
            record_size,
            len,
            data,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reads a numeric field as a `(len, elements)` array of `f64`.
    pub fn numeric(&self, name: &str) -> Result<Array2<f64>, MetadataError> {
        let field = self
            .field(name)
            .ok_or_else(|| MetadataError::MissingColumn(name.to_string()))?;
        if matches!(field.scalar, ScalarType::Bytes(_)) {
            return Err(MetadataError::Npy(format!("field '{}' is not numeric", name)));
        }
        let count = field.count();
        let width = field.scalar.size();
        let mut values = Vec::with_capacity(self.len * count);
        for record in 0..self.len {
            let start = record * self.record_size + field.offset;
            for k in 0..count {
                let b = &self.data[start + k * width..start + (k + 1) * width];
                values.push(decode_number(b, field.scalar, field.little_endian));
            }
        }
        Array2::from_shape_vec((self.len, count), values)
            .map_err(|e| MetadataError::Npy(e.to_string()))
    }

    /// Reads a byte-string field, trimming trailing NULs.
    pub fn strings(&self, name: &str) -> Result<Vec<String>, MetadataError> {
        let field = self
            .field(name)
            .ok_or_else(|| MetadataError::MissingColumn(name.to_string()))?;
        let ScalarType::Bytes(width) = field.scalar else {
            return Err(MetadataError::Npy(format!("field '{}' is not a string", name)));
        };
        (0..self.len)
            .map(|record| {
                let start = record * self.record_size + field.offset;
                let raw = &self.data[start..start + width];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
                String::from_utf8(raw[..end].to_vec()).map_err(|_| MetadataError::InvalidValue {
                    column: name.to_string(),
                    row: record,
                    value: String::from_utf8_lossy(&raw[..end]).into_owned(),
                })
            })
            .collect()
    }
}

fn decode_number(b: &[u8], scalar: ScalarType, le: bool) -> f64 {
    macro_rules! num {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(b);
            (if le { <$t>::from_le_bytes(buf) } else { <$t>::from_be_bytes(buf) }) as f64
        }};
    }
    match scalar {
        ScalarType::F4 => num!(f32, 4),
        ScalarType::F8 => num!(f64, 8),
        ScalarType::I4 => num!(i32, 4),
        ScalarType::I8 => num!(i64, 8),
        ScalarType::U1 => f64::from(b[0]),
        ScalarType::U4 => num!(u32, 4),
        ScalarType::U8 => num!(u64, 8),
        ScalarType::Bytes(_) => f64::NAN,
    }
}

fn fields_from_descr(descr: &Value) -> Result<Vec<Field>, MetadataError> {
    let Value::List(entries) = descr else {
        return Err(MetadataError::Npy("'descr' is not a list of fields".to_string()));
    };
    let mut offset = 0;
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Tuple(parts) = entry else {
            return Err(MetadataError::Npy("field description is not a tuple".to_string()));
        };
        let (name, type_str, shape) = match parts.as_slice() {
            [Value::Str(n), Value::Str(t)] => (n, t, Vec::new()),
            [Value::Str(n), Value::Str(t), Value::Tuple(dims)] => (
                n,
                t,
                dims.iter()
                    .map(Value::as_usize)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| MetadataError::Npy(format!("invalid shape for '{}'", n)))?,
            ),
            _ => return Err(MetadataError::Npy("unsupported field description".to_string())),
        };
        let (scalar, little_endian) = ScalarType::parse(type_str)?;
        let field = Field {
            name: name.clone(),
            scalar,
            little_endian,
            shape,
            offset,
        };
        offset += field.size();
        fields.push(field);
    }
    Ok(fields)
}

/// The subset of Python literals that appears in `.npy` headers.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Tuple(Vec<Value>),
    List(Vec<Value>),
}

impl Value {
    fn as_usize(&self) -> Option<usize> {
        match self {
            Value::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }
}

struct HeaderParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> HeaderParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn error(message: &str) -> MetadataError {
        MetadataError::Npy(format!("malformed header: {}", message))
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, c: char) -> Result<(), MetadataError> {
        self.skip_ws();
        match self.chars.next() {
            Some(found) if found == c => Ok(()),
            _ => Err(Self::error(&format!("expected '{}'", c))),
        }
    }

    fn parse_dict(&mut self) -> Result<Vec<(String, Value)>, MetadataError> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.next_if_eq(&'}').is_some() {
                return Ok(entries);
            }
            let Value::Str(key) = self.parse_value()? else {
                return Err(Self::error("dictionary keys must be strings"));
            };
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            self.skip_ws();
            self.chars.next_if_eq(&',');
        }
    }

    fn parse_sequence(&mut self, close: char) -> Result<Vec<Value>, MetadataError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.next_if_eq(&close).is_some() {
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            self.chars.next_if_eq(&',');
        }
    }

    fn parse_value(&mut self) -> Result<Value, MetadataError> {
        self.skip_ws();
        match self.chars.next() {
            Some(q @ ('\'' | '"')) => {
                let mut s = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == q => return Ok(Value::Str(s)),
                        Some(c) => s.push(c),
                        None => return Err(Self::error("unterminated string")),
                    }
                }
            }
            Some('(') => Ok(Value::Tuple(self.parse_sequence(')')?)),
            Some('[') => Ok(Value::List(self.parse_sequence(']')?)),
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let mut s = String::from(c);
                while let Some(d) = self.chars.next_if(|d| d.is_ascii_digit()) {
                    s.push(d);
                }
                s.parse().map(Value::Int).map_err(|_| Self::error("invalid integer"))
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut s = String::from(c);
                while let Some(d) = self.chars.next_if(|d| d.is_ascii_alphanumeric()) {
                    s.push(d);
                }
                match s.as_str() {
                    "True" => Ok(Value::Bool(true)),
                    "False" => Ok(Value::Bool(false)),
                    other => Err(Self::error(&format!("unexpected identifier '{}'", other))),
                }
            }
            _ => Err(Self::error("unexpected character")),
        }
    }
}

/// Builds the bytes of a version 1.0 `.npy` structured array. Used to produce fixtures.
#[cfg(test)]
pub(crate) fn write_record_array(descr: &str, len: usize, records: &[u8]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': {}, 'fortran_order': False, 'shape': ({},), }}",
        descr, len
    );
    let total = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - total % 64) % 64));
    header.push('\n');
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(records);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut records = Vec::new();
        for i in 0..2u64 {
            records.extend_from_slice(&(100 + i).to_le_bytes());
            let mut name = *b"img.mrc\0";
            name[3] = b'0' + i as u8;
            records.extend_from_slice(&name);
            for k in 0..3 {
                records.extend_from_slice(&((i * 3 + k) as f32 * 0.5).to_le_bytes());
            }
            records.push(7);
        }
        write_record_array(
            "[('uid', '<u8'), ('blob/path', '|S8'), ('alignments3D/pose', '<f4', (3,)), ('flag', '|u1')]",
            2,
            &records,
        )
    }

    #[test]
    fn parses_header_and_field_layout() {
        let array = RecordArray::parse(&sample()).unwrap();
        assert_eq!(array.len, 2);
        assert_eq!(array.record_size, 8 + 8 + 12 + 1);
        let pose = array.field("alignments3D/pose").unwrap();
        assert_eq!(pose.offset, 16);
        assert_eq!(pose.shape, vec![3]);
    }

    #[test]
    fn reads_numeric_and_string_fields() {
        let array = RecordArray::parse(&sample()).unwrap();
        let pose = array.numeric("alignments3D/pose").unwrap();
        assert_eq!(pose.dim(), (2, 3));
        assert_eq!(pose[[1, 2]], 2.5);
        assert_eq!(array.numeric("uid").unwrap()[[1, 0]], 101.0);
        assert_eq!(array.numeric("flag").unwrap()[[0, 0]], 7.0);
        assert_eq!(array.strings("blob/path").unwrap(), vec!["img0mrc", "img1mrc"]);
    }

    #[test]
    fn missing_field_and_type_mismatch_are_errors() {
        let array = RecordArray::parse(&sample()).unwrap();
        assert!(matches!(array.numeric("ctf/df1_A"), Err(MetadataError::MissingColumn(_))));
        assert!(array.numeric("blob/path").is_err());
        assert!(array.strings("uid").is_err());
    }

    #[test]
    fn rejects_non_npy_bytes_and_object_fields() {
        assert!(RecordArray::parse(b"not a numpy file").is_err());
        let bytes = write_record_array("[('path', '|O')]", 0, &[]);
        assert!(RecordArray::parse(&bytes).is_err());
    }

    #[test]
    fn truncated_records_are_rejected() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 3);
        assert!(RecordArray::parse(&bytes).is_err());
    }
}
