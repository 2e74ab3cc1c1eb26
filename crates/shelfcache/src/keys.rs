//! Cache key construction
//!
//! [`hash_key`] derives the disk id of a cache key. [`KeyBuilder`]
//! implementations turn call arguments into cache keys for the memoization
//! wrappers.

use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};

// Fixed seeds keep disk ids stable across process restarts.
const SEEDS: [u64; 4] = [
    0x5348_454c_4643_4143,
    0x6865_6b65_7973_0001,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
];

/// Disk id of a cache key: the decimal form of its 64-bit hash
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> String {
    let state = RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]);
    BuildHasher::hash_one(&state, key).to_string()
}

/// Turns call arguments into a cache key
///
/// The qualifier names the memoized callable so that one cache can serve
/// several callables without collisions.
pub trait KeyBuilder<A, K> {
    /// Build the key for a call with `args`
    fn build_key(&self, qualifier: &str, args: &A) -> Result<K>;
}

impl<A, K, F> KeyBuilder<A, K> for F
where
    F: Fn(&str, &A) -> Result<K>,
{
    fn build_key(&self, qualifier: &str, args: &A) -> Result<K> {
        self(qualifier, args)
    }
}

/// Key of one call: the callable's qualifier plus its arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey<A> {
    /// Name of the memoized callable
    pub qualifier: String,
    /// Call arguments
    pub args: A,
}

/// Default key builder: uses the arguments as they are
#[derive(Debug, Clone, Copy, Default)]
pub struct HashKey;

impl<A: Clone> KeyBuilder<A, CallKey<A>> for HashKey {
    fn build_key(&self, qualifier: &str, args: &A) -> Result<CallKey<A>> {
        Ok(CallKey {
            qualifier: qualifier.to_string(),
            args: args.clone(),
        })
    }
}

/// Hashable form of a dynamic argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKey {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer above `i64::MAX`
    UInt(u64),
    /// Float, keyed by bit pattern
    Float(u64),
    /// String
    Str(String),
    /// Top-level sequence of scalars
    Tuple(Vec<ArgKey>),
}

impl ArgKey {
    fn scalar(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(ArgKey::Null),
            Value::Bool(b) => Ok(ArgKey::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ArgKey::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(ArgKey::UInt(u))
                } else {
                    Ok(ArgKey::Float(n.as_f64().unwrap_or(f64::NAN).to_bits()))
                }
            }
            Value::String(s) => Ok(ArgKey::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => {
                Err(CacheError::UnhashableArgument(value.to_string()))
            }
        }
    }

    /// Convert one argument, turning a top-level array into a tuple
    ///
    /// Not recursive: `[1, 2, 3]` works, `[1, 2, [1, 2, 3]]` does not.
    pub fn from_arg(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(Self::scalar)
                .collect::<Result<Vec<_>>>()
                .map(ArgKey::Tuple),
            other => Self::scalar(other),
        }
    }
}

/// Key builder for dynamic arguments that converts lists to tuples
///
/// Accepts positional arguments as `Vec<Value>`, keyword arguments as a
/// JSON object (keys in sorted order), or both as a pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoTupleKey;

fn positional(args: &[Value]) -> Result<Vec<ArgKey>> {
    args.iter().map(ArgKey::from_arg).collect()
}

fn keyword(args: &Map<String, Value>) -> Result<Vec<(String, ArgKey)>> {
    let mut pairs = args
        .iter()
        .map(|(name, value)| Ok((name.clone(), ArgKey::from_arg(value)?)))
        .collect::<Result<Vec<_>>>()?;
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

impl KeyBuilder<Vec<Value>, CallKey<Vec<ArgKey>>> for AutoTupleKey {
    fn build_key(&self, qualifier: &str, args: &Vec<Value>) -> Result<CallKey<Vec<ArgKey>>> {
        Ok(CallKey {
            qualifier: qualifier.to_string(),
            args: positional(args)?,
        })
    }
}

impl KeyBuilder<Map<String, Value>, CallKey<Vec<(String, ArgKey)>>> for AutoTupleKey {
    fn build_key(
        &self,
        qualifier: &str,
        args: &Map<String, Value>,
    ) -> Result<CallKey<Vec<(String, ArgKey)>>> {
        Ok(CallKey {
            qualifier: qualifier.to_string(),
            args: keyword(args)?,
        })
    }
}

/// Positional and keyword arguments of one call
pub type MixedArgs = (Vec<ArgKey>, Vec<(String, ArgKey)>);

impl KeyBuilder<(Vec<Value>, Map<String, Value>), CallKey<MixedArgs>> for AutoTupleKey {
    fn build_key(
        &self,
        qualifier: &str,
        args: &(Vec<Value>, Map<String, Value>),
    ) -> Result<CallKey<MixedArgs>> {
        Ok(CallKey {
            qualifier: qualifier.to_string(),
            args: (positional(&args.0)?, keyword(&args.1)?),
        })
    }
}
