//! Test data generators for creating synthetic data cubes.
//!
//! These generators create predictable, verifiable cubes that can be used
//! across the test suite.

use xcube_core::store::{Dataset, Variable};

/// Default cube size: 3 time steps, 4 latitudes, 8 longitudes.
pub const CUBE_TIME_SIZE: usize = 3;
pub const CUBE_LAT_SIZE: usize = 4;
pub const CUBE_LON_SIZE: usize = 8;

/// Creates a cube with `time`, `lat` and `lon` coordinates and one constant
/// data variable per `(name, value)` pair.
///
/// # Example
///
/// ```
/// use test_utils::new_cube;
///
/// let cube = new_cube(&[("a", 4.1), ("b", 7.4)]);
/// assert_eq!(cube.data_vars.len(), 2);
/// assert_eq!(cube.data_vars["a"].shape, vec![3, 4, 8]);
/// assert!(cube.data_vars["b"].data.iter().all(|&v| v == 7.4));
/// ```
pub fn new_cube(variables: &[(&str, f64)]) -> Dataset {
    new_cube_at(0, CUBE_TIME_SIZE, variables)
}

/// Like [`new_cube`], with `time_size` daily time steps starting at day
/// `time_start`.
pub fn new_cube_at(time_start: usize, time_size: usize, variables: &[(&str, f64)]) -> Dataset {
    let shape = vec![time_size as u64, CUBE_LAT_SIZE as u64, CUBE_LON_SIZE as u64];
    let len = time_size * CUBE_LAT_SIZE * CUBE_LON_SIZE;

    let mut cube = Dataset::new()
        .with_coord("time", time_axis(time_start, time_size))
        .and_then(|c| c.with_coord("lat", lat_axis(CUBE_LAT_SIZE)))
        .and_then(|c| c.with_coord("lon", lon_axis(CUBE_LON_SIZE)))
        .expect("coordinate axes are consistent")
        .with_attr("title", serde_json::json!("Test cube"));

    for (name, value) in variables {
        let variable = Variable::new(["time", "lat", "lon"], shape.clone(), vec![*value; len])
            .expect("data matches shape");
        cube = cube.with_data_var(*name, variable).expect("variable matches cube");
    }
    cube
}

/// Creates a variable whose values encode their position.
///
/// Each value is calculated as: `t * 10000 + y * 100 + x`
///
/// This makes it easy to verify that data is being read/written correctly
/// and that concatenation keeps row-major order.
pub fn create_indexed_variable(time_size: usize, lat_size: usize, lon_size: usize) -> Variable {
    let mut data = Vec::with_capacity(time_size * lat_size * lon_size);
    for t in 0..time_size {
        for y in 0..lat_size {
            for x in 0..lon_size {
                data.push((t * 10000 + y * 100 + x) as f64);
            }
        }
    }
    Variable::new(
        ["time", "lat", "lon"],
        vec![time_size as u64, lat_size as u64, lon_size as u64],
        data,
    )
    .expect("data matches shape")
}

/// Days since 1970-01-01, starting at `start`.
fn time_axis(start: usize, size: usize) -> Variable {
    Variable::vector("time", (start..start + size).map(|d| d as f64).collect())
        .with_attr("units", serde_json::json!("days since 1970-01-01"))
        .with_attr("standard_name", serde_json::json!("time"))
}

/// Cell centres of a global grid from south to north.
fn lat_axis(size: usize) -> Variable {
    let res = 180.0 / size as f64;
    Variable::vector("lat", (0..size).map(|i| -90.0 + res * (i as f64 + 0.5)).collect())
        .with_attr("units", serde_json::json!("degrees_north"))
}

/// Cell centres of a global grid from west to east.
fn lon_axis(size: usize) -> Variable {
    let res = 360.0 / size as f64;
    Variable::vector("lon", (0..size).map(|i| -180.0 + res * (i as f64 + 0.5)).collect())
        .with_attr("units", serde_json::json!("degrees_east"))
}
