//! Tensor container serialization.
//!
//! Checkpoints are stored in the `SafeTensors` layout:
//! ```text
//! [8-byte header: u64 metadata length (little-endian)]
//! [JSON metadata: tensor names, dtypes, shapes, data_offsets, __metadata__]
//! [Raw tensor data: F32 values in little-endian]
//! ```
//!
//! Example:
//! ```rust
//! use std::collections::BTreeMap;
//! use relgat::serialization::safetensors::{from_bytes, to_bytes, UserMetadata};
//! use relgat::tensor::Tensor;
//!
//! let mut tensors = BTreeMap::new();
//! tensors.insert("weight".to_string(), Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]));
//! let mut meta = UserMetadata::new();
//! meta.insert("epoch".to_string(), "3".to_string());
//!
//! let bytes = to_bytes(&tensors, &meta).unwrap();
//! let (loaded, loaded_meta) = from_bytes(&bytes).unwrap();
//! assert_eq!(loaded["weight"].shape(), &[2, 2]);
//! assert_eq!(loaded_meta["epoch"], "3");
//! ```

pub mod safetensors;

pub use safetensors::{
    load_safetensors, save_safetensors, SafeTensorsMetadata, TensorMetadata, UserMetadata,
};
