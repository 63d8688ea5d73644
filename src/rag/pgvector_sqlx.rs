// sqlx codec for pgvector's `vector` column type.
// Encodes with the binary protocol; decodes from the textual form.

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

/// Wrapper type for pgvector's vector type
#[derive(Debug, Clone, PartialEq)]
pub struct PgVector(pub Vec<f32>);

impl PgVector {
    pub fn new(vec: Vec<f32>) -> Self {
        Self(vec)
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f32>> for PgVector {
    fn from(vec: Vec<f32>) -> Self {
        Self(vec)
    }
}

impl From<PgVector> for Vec<f32> {
    fn from(vec: PgVector) -> Self {
        vec.0
    }
}

impl Type<Postgres> for PgVector {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("vector")
    }
}

impl PgHasArrayType for PgVector {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_vector")
    }
}

impl Encode<'_, Postgres> for PgVector {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        // Binary format: u16 dimension count, 2 unused bytes, then each
        // component as a big-endian f32
        let dim = self.0.len() as u16;
        buf.extend_from_slice(&dim.to_be_bytes());
        buf.extend_from_slice(&[0u8, 0u8]);
        for &value in &self.0 {
            buf.extend_from_slice(&value.to_be_bytes());
        }

        IsNull::No
    }
}

impl Decode<'_, Postgres> for PgVector {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        // pgvector renders vectors as [1.0,2.0,3.0]
        let s = <&str as Decode<Postgres>>::decode(value)?;

        let s = s.trim();
        if !s.starts_with('[') || !s.ends_with(']') {
            return Err(format!("invalid vector literal: expected [x,y,z], got {s}").into());
        }

        let content = &s[1..s.len() - 1];
        if content.is_empty() {
            return Ok(PgVector(Vec::new()));
        }

        let floats = content
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| format!("failed to parse vector component: {e}"))?;

        Ok(PgVector(floats))
    }
}
