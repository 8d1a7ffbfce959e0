//! Minimal in-memory dataset model.
//!
//! A [`Dataset`] holds named coordinate and data variables. Every variable is
//! a dense `f64` array in row-major order labelled with dimension names.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{XcubeError, XcubeResult};

/// JSON attributes attached to variables and datasets.
pub type Attributes = serde_json::Map<String, Value>;

/// A labelled n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<u64>,
    pub data: Vec<f64>,
    pub attrs: Attributes,
}

impl Variable {
    pub fn new<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<u64>,
        data: Vec<f64>,
    ) -> XcubeResult<Self> {
        let variable = Self {
            dims: dims.into_iter().map(Into::into).collect(),
            shape,
            data,
            attrs: Attributes::new(),
        };
        variable.check_shape()?;
        Ok(variable)
    }

    /// Check that dims, shape and data agree. The fields are public, so
    /// variables built by hand may not.
    pub fn check_shape(&self) -> XcubeResult<()> {
        if self.dims.len() != self.shape.len() {
            return Err(XcubeError::invalid_argument(format!(
                "variable has {} dimension names but a shape of rank {}",
                self.dims.len(),
                self.shape.len()
            )));
        }
        let expected = self
            .shape
            .iter()
            .try_fold(1u64, |n, &size| n.checked_mul(size));
        if expected != Some(self.data.len() as u64) {
            return Err(XcubeError::invalid_argument(format!(
                "variable of shape {:?} needs {} values, got {}",
                self.shape,
                expected.map_or_else(|| "too many".to_string(), |n| n.to_string()),
                self.data.len()
            )));
        }
        Ok(())
    }

    /// A one-dimensional variable along `dim`.
    pub fn vector(dim: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            dims: vec![dim.into()],
            shape: vec![data.len() as u64],
            data,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Axis index of `dim`.
    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Concatenate along `axis`. Shapes must agree on every other axis.
    fn concat(&self, other: &Variable, axis: usize) -> XcubeResult<Variable> {
        self.check_shape()?;
        other.check_shape()?;
        if self.dims != other.dims {
            return Err(XcubeError::invalid_argument(format!(
                "cannot concatenate variables with dimensions {:?} and {:?}",
                self.dims, other.dims
            )));
        }
        for (i, (a, b)) in self.shape.iter().zip(&other.shape).enumerate() {
            if i != axis && a != b {
                return Err(XcubeError::invalid_argument(format!(
                    "dimension \"{}\" has size {} and {}",
                    self.dims[i], a, b
                )));
            }
        }

        let outer: u64 = self.shape[..axis].iter().product();
        let trailing: u64 = self.shape[axis + 1..].iter().product();
        let block_a = (self.shape[axis] * trailing) as usize;
        let block_b = (other.shape[axis] * trailing) as usize;

        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        for i in 0..outer as usize {
            data.extend_from_slice(&self.data[i * block_a..(i + 1) * block_a]);
            data.extend_from_slice(&other.data[i * block_b..(i + 1) * block_b]);
        }

        let mut shape = self.shape.clone();
        shape[axis] += other.shape[axis];
        Ok(Variable {
            dims: self.dims.clone(),
            shape,
            data,
            attrs: self.attrs.clone(),
        })
    }
}

/// A collection of variables sharing named dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub coords: BTreeMap<String, Variable>,
    pub data_vars: BTreeMap<String, Variable>,
    pub attrs: Attributes,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord(mut self, name: impl Into<String>, variable: Variable) -> XcubeResult<Self> {
        let name = name.into();
        self.check_dims(&name, &variable)?;
        self.coords.insert(name, variable);
        Ok(self)
    }

    pub fn with_data_var(
        mut self,
        name: impl Into<String>,
        variable: Variable,
    ) -> XcubeResult<Self> {
        let name = name.into();
        self.check_dims(&name, &variable)?;
        self.data_vars.insert(name, variable);
        Ok(self)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Size of every dimension used by the dataset.
    pub fn dims(&self) -> BTreeMap<String, u64> {
        let mut dims = BTreeMap::new();
        for variable in self.variables().map(|(_, v)| v) {
            for (dim, size) in variable.dims.iter().zip(&variable.shape) {
                dims.entry(dim.clone()).or_insert(*size);
            }
        }
        dims
    }

    /// All variables, coordinates first.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.coords.iter().chain(self.data_vars.iter())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn is_coord(&self, name: &str) -> bool {
        self.coords.contains_key(name)
    }

    /// Remove the named variables. Unknown names are ignored.
    pub fn drop_variables<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name: &str = name.as_ref();
            self.coords.remove(name);
            self.data_vars.remove(name);
        }
        self
    }

    /// Keep only the named data variables. All coordinates are kept.
    pub fn select_variables<S: AsRef<str>>(mut self, names: &[S]) -> XcubeResult<Self> {
        let names: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
        if let Some(missing) = names.iter().find(|name| !self.data_vars.contains_key(**name)) {
            return Err(XcubeError::invalid_argument(format!(
                "variable \"{}\" not found in dataset",
                missing
            )));
        }
        self.data_vars
            .retain(|name, _| names.contains(&name.as_str()));
        Ok(self)
    }

    /// Check every variable with [`Variable::check_shape`], naming the
    /// offending one.
    pub fn check_variables(&self) -> XcubeResult<()> {
        for (name, variable) in self.variables() {
            variable.check_shape().map_err(|e| {
                XcubeError::invalid_argument(format!("variable \"{}\": {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Append `other` to this dataset along `dim`.
    ///
    /// Variables carrying `dim` are concatenated; variables without it are
    /// taken from `self`. Both datasets must have the same variables.
    pub fn concat(&self, other: &Dataset, dim: &str) -> XcubeResult<Dataset> {
        if !self.dims().contains_key(dim) {
            return Err(XcubeError::invalid_argument(format!(
                "dimension \"{}\" not found in dataset",
                dim
            )));
        }

        let join = |ours: &BTreeMap<String, Variable>, theirs: &BTreeMap<String, Variable>| {
            if ours.keys().ne(theirs.keys()) {
                return Err(XcubeError::invalid_argument(format!(
                    "cannot append along \"{}\": variables differ",
                    dim
                )));
            }
            ours.iter()
                .map(|(name, variable)| {
                    let joined = match variable.axis(dim) {
                        Some(axis) => variable.concat(&theirs[name], axis)?,
                        None => variable.clone(),
                    };
                    Ok((name.clone(), joined))
                })
                .collect::<XcubeResult<BTreeMap<_, _>>>()
        };

        Ok(Dataset {
            coords: join(&self.coords, &other.coords)?,
            data_vars: join(&self.data_vars, &other.data_vars)?,
            attrs: self.attrs.clone(),
        })
    }

    fn check_dims(&self, name: &str, variable: &Variable) -> XcubeResult<()> {
        let dims = self.dims();
        for (dim, size) in variable.dims.iter().zip(&variable.shape) {
            if let Some(existing) = dims.get(dim) {
                if existing != size {
                    return Err(XcubeError::invalid_argument(format!(
                        "variable \"{}\" has size {} along \"{}\", dataset has {}",
                        name, size, dim, existing
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(times: &[f64], value: f64) -> Dataset {
        let n = times.len() as u64;
        let data = (0..n * 2).map(|i| value + i as f64).collect();
        Dataset::new()
            .with_coord("time", Variable::vector("time", times.to_vec()))
            .unwrap()
            .with_coord("lat", Variable::vector("lat", vec![10.0, 20.0]))
            .unwrap()
            .with_data_var(
                "chl",
                Variable::new(["time", "lat"], vec![n, 2], data).unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_variable_shape_checked() {
        assert!(Variable::new(["x"], vec![3], vec![1.0, 2.0]).is_err());
        assert!(Variable::new(["x", "y"], vec![3], vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_hand_built_variable_checked() {
        let mut ds = cube(&[0.0, 1.0], 0.0);
        assert!(ds.check_variables().is_ok());

        let chl = ds.data_vars.get_mut("chl").unwrap();
        chl.data.pop();
        let err = ds.check_variables().unwrap_err();
        assert!(matches!(err, XcubeError::InvalidArgument(_)));
        assert!(err.to_string().contains("\"chl\""));

        // Concatenation reports the broken variable instead of slicing past it.
        assert!(cube(&[2.0], 0.0).concat(&ds, "time").is_err());
        assert!(ds.concat(&cube(&[2.0], 0.0), "time").is_err());
    }

    #[test]
    fn test_inconsistent_dimension_rejected() {
        let err = cube(&[0.0], 0.0)
            .with_data_var("bad", Variable::vector("lat", vec![1.0, 2.0, 3.0]))
            .unwrap_err();
        assert!(err.to_string().contains("\"lat\""));
    }

    #[test]
    fn test_dims() {
        let dims = cube(&[0.0, 1.0, 2.0], 0.0).dims();
        assert_eq!(dims["time"], 3);
        assert_eq!(dims["lat"], 2);
    }

    #[test]
    fn test_drop_and_select() {
        let ds = cube(&[0.0], 0.0)
            .with_data_var("tsm", Variable::vector("time", vec![1.0]))
            .unwrap();
        let selected = ds.clone().select_variables(&["chl"]).unwrap();
        assert!(selected.variable("tsm").is_none());
        assert!(selected.variable("time").is_some());
        assert!(ds.clone().select_variables(&["nope"]).is_err());

        let dropped = ds.drop_variables(&["chl", "nope"]);
        assert!(dropped.variable("chl").is_none());
        assert!(dropped.variable("tsm").is_some());
    }

    #[test]
    fn test_concat_along_leading_dim() {
        let joined = cube(&[0.0, 1.0], 0.0).concat(&cube(&[2.0], 100.0), "time").unwrap();
        assert_eq!(joined.coords["time"].data, vec![0.0, 1.0, 2.0]);
        assert_eq!(joined.coords["lat"].data, vec![10.0, 20.0]);
        assert_eq!(joined.data_vars["chl"].shape, vec![3, 2]);
        assert_eq!(
            joined.data_vars["chl"].data,
            vec![0.0, 1.0, 2.0, 3.0, 100.0, 101.0]
        );
    }

    #[test]
    fn test_concat_along_inner_dim() {
        let a = Variable::new(["y", "x"], vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Variable::new(["y", "x"], vec![2, 1], vec![5.0, 6.0]).unwrap();
        let joined = a.concat(&b, 1).unwrap();
        assert_eq!(joined.shape, vec![2, 3]);
        assert_eq!(joined.data, vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_concat_unknown_dim() {
        assert!(cube(&[0.0], 0.0).concat(&cube(&[1.0], 0.0), "depth").is_err());
    }
}
