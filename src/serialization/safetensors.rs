//! `SafeTensors` container for named `f32` tensors.
//!
//! Only the F32 dtype is written or accepted. Tensor entries are emitted in
//! sorted key order so the same state always produces the same bytes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelGatError, Result};
use crate::tensor::{checked_numel, Tensor};

/// Key of the string-to-string user metadata section.
const USER_METADATA_KEY: &str = "__metadata__";

/// Metadata for a single tensor in `SafeTensors` format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorMetadata {
    /// Data type of the tensor (always "F32" here).
    pub dtype: String,
    /// Shape of the tensor.
    pub shape: Vec<usize>,
    /// Data offsets `[start, end)` in the raw data section.
    pub data_offsets: [usize; 2],
}

/// Tensor entries of a header.
/// Uses `BTreeMap` for deterministic JSON serialization (sorted keys).
pub type SafeTensorsMetadata = BTreeMap<String, TensorMetadata>;

/// User metadata from the `__metadata__` header section.
pub type UserMetadata = BTreeMap<String, String>;

/// Encode tensors and user metadata into a `SafeTensors` byte buffer.
///
/// Gradients are not stored.
///
/// # Errors
///
/// Returns `Serialization` if the header cannot be encoded.
pub fn to_bytes(tensors: &BTreeMap<String, Tensor>, user_metadata: &UserMetadata) -> Result<Vec<u8>> {
    let mut header = serde_json::Map::new();

    if !user_metadata.is_empty() {
        header.insert(
            USER_METADATA_KEY.to_string(),
            serde_json::to_value(user_metadata)?,
        );
    }

    let mut raw_data = Vec::new();
    let mut current_offset = 0;

    for (name, tensor) in tensors {
        let start_offset = current_offset;
        let end_offset = current_offset + tensor.numel() * 4; // F32 = 4 bytes

        let meta = TensorMetadata {
            dtype: "F32".to_string(),
            shape: tensor.shape().to_vec(),
            data_offsets: [start_offset, end_offset],
        };
        header.insert(name.clone(), serde_json::to_value(meta)?);

        for &value in tensor.data() {
            raw_data.extend_from_slice(&value.to_le_bytes());
        }
        current_offset = end_offset;
    }

    let metadata_json = serde_json::to_string(&header)?;
    let metadata_bytes = metadata_json.as_bytes();
    let metadata_len = metadata_bytes.len() as u64;

    let mut output = Vec::with_capacity(8 + metadata_bytes.len() + raw_data.len());
    output.extend_from_slice(&metadata_len.to_le_bytes());
    output.extend_from_slice(metadata_bytes);
    output.extend_from_slice(&raw_data);
    Ok(output)
}

/// Write tensors and user metadata to `path`.
///
/// # Errors
///
/// Returns `Io` if the file cannot be written, `Serialization` if the header
/// cannot be encoded.
pub fn save_safetensors<P: AsRef<Path>>(
    path: P,
    tensors: &BTreeMap<String, Tensor>,
    user_metadata: &UserMetadata,
) -> Result<()> {
    let bytes = to_bytes(tensors, user_metadata)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Decode a `SafeTensors` byte buffer.
///
/// # Errors
///
/// Returns `Format` for a truncated buffer, a non-F32 tensor, offsets outside
/// the data section, or a shape that disagrees with the stored byte count.
/// Returns `Serialization` if the header is not valid JSON.
pub fn from_bytes(bytes: &[u8]) -> Result<(BTreeMap<String, Tensor>, UserMetadata)> {
    let metadata_len = validate_and_read_header(bytes)?;
    let (metadata, user_metadata) = parse_metadata(bytes, metadata_len)?;
    let raw_data = &bytes[8 + metadata_len..];

    let mut tensors = BTreeMap::new();
    for (name, meta) in &metadata {
        let values = extract_tensor(raw_data, meta)
            .map_err(|e| RelGatError::Format(format!("tensor '{name}': {e}")))?;
        let tensor = Tensor::from_vec(values, &meta.shape)
            .map_err(|e| RelGatError::Format(format!("tensor '{name}': {e}")))?;
        tensors.insert(name.clone(), tensor);
    }
    Ok((tensors, user_metadata))
}

/// Read tensors and user metadata from `path`.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, plus every error of [`from_bytes`].
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<(BTreeMap<String, Tensor>, UserMetadata)> {
    let bytes = fs::read(path)?;
    from_bytes(&bytes)
}

fn validate_and_read_header(bytes: &[u8]) -> Result<usize> {
    let Some(header_bytes) = bytes.get(0..8) else {
        return Err(RelGatError::Format(format!(
            "file is {} bytes, need at least 8 bytes for header",
            bytes.len()
        )));
    };
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(header_bytes);
    let metadata_len = u64::from_le_bytes(len_bytes) as usize;

    if metadata_len == 0 {
        return Err(RelGatError::Format("metadata length is 0".to_string()));
    }
    if metadata_len > bytes.len() - 8 {
        return Err(RelGatError::Format(format!(
            "metadata length {metadata_len} exceeds file size"
        )));
    }
    Ok(metadata_len)
}

fn parse_metadata(bytes: &[u8], metadata_len: usize) -> Result<(SafeTensorsMetadata, UserMetadata)> {
    let metadata_str = std::str::from_utf8(&bytes[8..8 + metadata_len])
        .map_err(|e| RelGatError::Format(format!("metadata is not valid UTF-8: {e}")))?;

    let raw: serde_json::Value = serde_json::from_str(metadata_str)?;
    let serde_json::Value::Object(map) = raw else {
        return Err(RelGatError::Format("header is not a JSON object".to_string()));
    };

    let mut metadata = SafeTensorsMetadata::new();
    let mut user_metadata = UserMetadata::new();

    for (key, value) in map {
        if key == USER_METADATA_KEY {
            extract_user_metadata(value, &mut user_metadata);
            continue;
        }
        let tensor_meta: TensorMetadata = serde_json::from_value(value)?;
        metadata.insert(key, tensor_meta);
    }
    Ok((metadata, user_metadata))
}

/// Keep the string entries of a `__metadata__` object.
fn extract_user_metadata(value: serde_json::Value, user_metadata: &mut UserMetadata) {
    let serde_json::Value::Object(meta_map) = value else {
        return;
    };
    for (k, v) in meta_map {
        if let serde_json::Value::String(s) = v {
            user_metadata.insert(k, s);
        }
    }
}

fn extract_tensor(raw_data: &[u8], meta: &TensorMetadata) -> std::result::Result<Vec<f32>, String> {
    if meta.dtype != "F32" {
        return Err(format!("unsupported dtype {}, expected F32", meta.dtype));
    }
    let [start, end] = meta.data_offsets;
    if start > end || end > raw_data.len() {
        return Err(format!(
            "invalid data offsets [{start}, {end}) for data section of {} bytes",
            raw_data.len()
        ));
    }
    let Some(expected) = checked_numel(&meta.shape).and_then(|n| n.checked_mul(4)) else {
        return Err(format!("shape {:?} overflows the addressable size", meta.shape));
    };
    if end - start != expected {
        return Err(format!(
            "shape {:?} needs {expected} bytes, found {}",
            meta.shape,
            end - start
        ));
    }

    Ok(raw_data[start..end]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<String, Tensor> {
        let mut tensors = BTreeMap::new();
        tensors.insert("b".to_string(), Tensor::from_slice(&[0.5, -1.5]));
        tensors.insert("a".to_string(), Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]));
        tensors
    }

    #[test]
    fn test_header_layout() {
        let bytes = to_bytes(&sample(), &UserMetadata::new()).expect("encode");
        let len = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes")) as usize;
        let header: serde_json::Value =
            serde_json::from_slice(&bytes[8..8 + len]).expect("json header");

        // sorted keys: "a" first
        assert_eq!(header["a"]["data_offsets"], serde_json::json!([0, 24]));
        assert_eq!(header["b"]["data_offsets"], serde_json::json!([24, 32]));
        assert_eq!(header["a"]["dtype"], "F32");
        assert!(header.get(USER_METADATA_KEY).is_none());
        assert_eq!(bytes.len(), 8 + len + 32);
    }

    #[test]
    fn test_roundtrip_with_metadata() {
        let mut meta = UserMetadata::new();
        meta.insert("epoch".into(), "7".into());
        let bytes = to_bytes(&sample(), &meta).expect("encode");
        let (tensors, loaded_meta) = from_bytes(&bytes).expect("decode");

        assert_eq!(tensors, sample());
        assert_eq!(loaded_meta, meta);
    }

    #[test]
    fn test_empty_tensor_is_allowed() {
        let mut tensors = BTreeMap::new();
        tensors.insert("empty".to_string(), Tensor::zeros(&[0, 4]));
        let bytes = to_bytes(&tensors, &UserMetadata::new()).expect("encode");
        let (loaded, _) = from_bytes(&bytes).expect("decode");
        assert_eq!(loaded["empty"].shape(), &[0, 4]);
    }

    #[test]
    fn test_gradient_is_not_stored() {
        let mut w = Tensor::from_slice(&[1.0]);
        w.set_grad(Tensor::from_slice(&[9.0])).expect("same shape");
        let mut tensors = BTreeMap::new();
        tensors.insert("w".to_string(), w);
        let (loaded, _) = from_bytes(&to_bytes(&tensors, &UserMetadata::new()).expect("encode"))
            .expect("decode");
        assert!(loaded["w"].grad().is_none());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        assert!(matches!(from_bytes(&[1, 2, 3]), Err(RelGatError::Format(_))));

        let mut bytes = to_bytes(&sample(), &UserMetadata::new()).expect("encode");
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_oversized_header_length_is_rejected() {
        let mut bytes = 1000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_non_f32_dtype_is_rejected() {
        let header = br#"{"w":{"dtype":"F16","shape":[1],"data_offsets":[0,2]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_shape_disagreeing_with_offsets_is_rejected() {
        let header = br#"{"w":{"dtype":"F32","shape":[3],"data_offsets":[0,8]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let header =
            br#"{"w":{"dtype":"F32","shape":[4611686018427387904,4],"data_offsets":[0,0]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_byte_count_overflow_is_rejected() {
        // element count fits in usize, its byte size does not
        let header = format!(
            r#"{{"w":{{"dtype":"F32","shape":[{}],"data_offsets":[0,0]}}}}"#,
            usize::MAX / 2
        );
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        assert!(matches!(from_bytes(&bytes), Err(RelGatError::Format(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("weights.safetensors");
        save_safetensors(&path, &sample(), &UserMetadata::new()).expect("save");
        let (tensors, meta) = load_safetensors(&path).expect("load");
        assert_eq!(tensors.len(), 2);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_safetensors(dir.path().join("missing.safetensors")).unwrap_err();
        assert!(matches!(err, RelGatError::Io(_)));
    }
}
