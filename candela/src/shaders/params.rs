// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Material parameter strings.
//!
//! A region's material specification is a shader name followed by
//! whitespace-separated `key=value` assignments, with three-element vector
//! values written `x,y,z`:
//!
//! ```text
//! plastic sh=8 di=0.6 sp=0.4
//! scloud s=500 d=1000,1200,2100
//! ```
//!
//! Each shader setup walks the parsed pairs and matches its own field names
//! (including the historical short aliases); an assignment naming no known
//! field fails the setup with a structured error.

use thiserror::Error;

/// Errors arising from material parameter strings.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ParamError {
    #[error("malformed parameter {0:?} (expected key=value)")]
    Syntax(String),
    #[error("unknown parameter {field:?} for shader {shader:?}")]
    UnknownField { shader: &'static str, field: String },
    #[error("parameter {field:?}: {value:?} is not a valid {expected}")]
    BadValue {
        field: String,
        value: String,
        expected: &'static str,
    },
}

/// A parsed material parameter string: the shader name and its `key=value`
/// assignments, in source order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParamSet {
    shader_name: String,
    pairs: Vec<(String, String)>,
}

impl ParamSet {
    /// Parses a full material specification (shader name first).
    pub fn parse_material(spec: &str) -> Result<Self, ParamError> {
        let mut tokens = spec.split_whitespace();
        let shader_name = tokens.next().unwrap_or("").to_string();
        let mut pairs = Vec::new();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ParamError::Syntax(token.to_string()))?;
            if key.is_empty() {
                return Err(ParamError::Syntax(token.to_string()));
            }
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(Self { shader_name, pairs })
    }

    pub fn shader_name(&self) -> &str {
        &self.shader_name
    }

    /// The assignments, in order. Later assignments to the same field win,
    /// which iteration order provides for free.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, Value<'_>)> {
        self.pairs.iter().map(|(k, v)| {
            (
                k.as_str(),
                Value {
                    field: k.as_str(),
                    text: v.as_str(),
                },
            )
        })
    }

    /// Error value for an assignment no field matched.
    pub fn unknown(&self, shader: &'static str, field: &str) -> ParamError {
        ParamError::UnknownField {
            shader,
            field: field.to_string(),
        }
    }
}

/// One assignment's value text, with typed accessors.
#[derive(Clone, Copy, Debug)]
pub struct Value<'a> {
    field: &'a str,
    text: &'a str,
}

impl Value<'_> {
    pub fn as_f64(&self) -> Result<f64, ParamError> {
        self.text.parse().map_err(|_| self.bad("number"))
    }

    pub fn as_i32(&self) -> Result<i32, ParamError> {
        // Accept a float spelling of an integral value, as the historical
        // parser did for %d fields fed from float-typed tables.
        if let Ok(i) = self.text.parse::<i32>() {
            return Ok(i);
        }
        match self.text.parse::<f64>() {
            Ok(f) if f.fract() == 0.0 => Ok(f as i32),
            _ => Err(self.bad("integer")),
        }
    }

    pub fn as_vec3(&self) -> Result<[f64; 3], ParamError> {
        let mut out = [0.0; 3];
        let mut n = 0;
        for piece in self.text.split(',') {
            if n == 3 {
                return Err(self.bad("x,y,z vector"));
            }
            out[n] = piece.parse().map_err(|_| self.bad("x,y,z vector"))?;
            n += 1;
        }
        if n != 3 {
            return Err(self.bad("x,y,z vector"));
        }
        Ok(out)
    }

    pub fn as_bool(&self) -> Result<bool, ParamError> {
        Ok(self.as_i32()? != 0)
    }

    fn bad(&self, expected: &'static str) -> ParamError {
        ParamError::BadValue {
            field: self.field.to_string(),
            value: self.text.to_string(),
            expected,
        }
    }
}
