use super::{Array, Dictionary, Name, Object, ObjectValueError, KEY_DECODE_PARMS, KEY_FILTER};
use crate::filter::FilterRegistry;
use log::error;
use once_cell::unsync::OnceCell;

const KEY_FFILTER: Name = Name::from_static("FFilter");

/// Stream object: dictionary plus payload.
///
/// Payload is kept in encoded form (as stored in file, after decryption),
/// decoded form, or both. Only one of them is authoritative, the other is a
/// cache derived on demand through the filter chain declared in the
/// dictionary. Setting one form drops the other.
#[derive(Clone, Debug)]
pub struct Stream {
    dict: Dictionary,
    encoded: OnceCell<Vec<u8>>,
    decoded: OnceCell<Vec<u8>>,
}

impl Stream {
    /// Create stream from decoded data, filters in `dict` are applied when
    /// encoded data requested.
    pub fn new(dict: Dictionary, decoded: Vec<u8>) -> Self {
        Self {
            dict,
            encoded: OnceCell::new(),
            decoded: OnceCell::with_value(decoded),
        }
    }

    /// Create stream from encoded data, such as stream body read from file.
    pub fn from_encoded(dict: Dictionary, encoded: Vec<u8>) -> Self {
        Self {
            dict,
            encoded: OnceCell::with_value(encoded),
            decoded: OnceCell::new(),
        }
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    /// Mutable dictionary. Changing `Filter` or `DecodeParms` here does not
    /// re-encode payload, use `set_filters()` for that.
    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    pub fn into_dict(self) -> Dictionary {
        self.dict
    }

    /// Encoded data if it is already known, without running any filter.
    pub fn raw(&self) -> Option<&[u8]> {
        self.encoded.get().map(Vec::as_slice)
    }

    /// Filter names and their parameters, in decode order.
    pub fn filters(&self) -> Result<Vec<(Name, Option<&Dictionary>)>, ObjectValueError> {
        if self.dict.contains_key(&KEY_FFILTER) {
            return Err(ObjectValueError::ExternalStreamNotSupported);
        }

        fn params_at(params: Option<&Object>, idx: usize) -> Option<&Dictionary> {
            match params {
                Some(Object::Dictionary(d)) if idx == 0 => Some(d),
                Some(Object::Array(arr)) => arr.get(idx).and_then(|o| o.opt_dict()),
                _ => None,
            }
        }

        let params = self.dict.get(&KEY_DECODE_PARMS);
        match self.dict.get(&KEY_FILTER) {
            None | Some(Object::Null) => Ok(vec![]),
            Some(Object::Name(name)) => Ok(vec![(name.clone(), params_at(params, 0))]),
            Some(Object::Array(names)) => names
                .iter()
                .enumerate()
                .map(|(idx, n)| n.name().map(|n| (n.clone(), params_at(params, idx))))
                .collect(),
            Some(_) => Err(ObjectValueError::UnexpectedType),
        }
    }

    /// Decoded data, run filters on encoded data on first call.
    pub fn decoded(&self, registry: &FilterRegistry) -> Result<&[u8], ObjectValueError> {
        self.decoded
            .get_or_try_init(|| {
                let Some(encoded) = self.encoded.get() else {
                    error!("stream has neither encoded nor decoded data");
                    return Err(ObjectValueError::StreamLengthNotDefined);
                };
                let mut buf = encoded.clone();
                for (name, params) in self.filters()? {
                    buf = registry.decode(&name, &buf, params)?;
                }
                Ok(buf)
            })
            .map(Vec::as_slice)
    }

    /// Encoded data, run filters in reverse order on decoded data on first call.
    pub fn encoded(&self, registry: &FilterRegistry) -> Result<&[u8], ObjectValueError> {
        self.encoded
            .get_or_try_init(|| {
                let Some(decoded) = self.decoded.get() else {
                    error!("stream has neither encoded nor decoded data");
                    return Err(ObjectValueError::StreamLengthNotDefined);
                };
                let mut buf = decoded.clone();
                for (name, params) in self.filters()?.into_iter().rev() {
                    buf = registry.encode(&name, &buf, params)?;
                }
                Ok(buf)
            })
            .map(Vec::as_slice)
    }

    /// Replace payload by decoded data, encoded form dropped.
    pub fn set_decoded(&mut self, data: Vec<u8>) {
        self.decoded = OnceCell::with_value(data);
        self.encoded = OnceCell::new();
    }

    /// Replace payload by encoded data, decoded form dropped.
    pub fn set_encoded(&mut self, data: Vec<u8>) {
        self.encoded = OnceCell::with_value(data);
        self.decoded = OnceCell::new();
    }

    /// Change filter chain, payload re-encoded on demand using new filters.
    /// `DecodeParms` removed, new filters use their default parameters.
    pub fn set_filters(
        &mut self,
        registry: &FilterRegistry,
        filters: Vec<Name>,
    ) -> Result<(), ObjectValueError> {
        self.decoded(registry)?;
        self.encoded = OnceCell::new();
        self.dict.remove(&KEY_DECODE_PARMS);
        match filters.len() {
            0 => {
                self.dict.remove(&KEY_FILTER);
            }
            1 => {
                let mut filters = filters;
                self.dict.set(KEY_FILTER, filters.remove(0));
            }
            _ => {
                let arr: Array = filters.into_iter().map(Object::Name).collect();
                self.dict.set(KEY_FILTER, arr);
            }
        }
        Ok(())
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        if self.dict != other.dict {
            return false;
        }
        match (self.encoded.get(), other.encoded.get()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self.decoded.get(), other.decoded.get()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests;
