use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occupancy {
    Occupied,
    Empty,
    Unknown,
}

/// Placement and resolution of the reconstruction volume in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Corner of voxel `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Voxel edge length.
    pub voxel_size: f64,
    /// Voxel count along x, y and z.
    pub dims: [usize; 3],
}

impl Default for GridSpec {
    /// A 160 x 140 x 160 mm box over the default 7x6 board, extending
    /// towards the cameras (negative board z).
    fn default() -> Self {
        Self {
            origin: [-35.0, -32.5, -160.0],
            voxel_size: 5.0,
            dims: [32, 28, 32],
        }
    }
}

/// Dense axis-aligned occupancy lattice, x fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    pub origin: Point3<f64>,
    pub voxel_size: f64,
    pub dims: [usize; 3],
    pub states: Vec<Occupancy>,
}

impl VoxelGrid {
    /// Grid with every voxel [`Occupancy::Unknown`].
    pub fn new(spec: &GridSpec) -> Self {
        let count = spec.dims.iter().product();
        Self {
            origin: Point3::from(spec.origin),
            voxel_size: spec.voxel_size,
            dims: spec.dims,
            states: vec![Occupancy::Unknown; count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        let [nx, ny, nz] = self.dims;
        (i < nx && j < ny && k < nz).then(|| (k * ny + j) * nx + i)
    }

    /// Inverse of [`VoxelGrid::index`].
    #[inline]
    pub fn coords(&self, idx: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dims;
        [idx % nx, (idx / nx) % ny, idx / (nx * ny)]
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<Occupancy> {
        self.index(i, j, k).map(|idx| self.states[idx])
    }

    /// World position of the centre of voxel `idx`.
    pub fn center(&self, idx: usize) -> Point3<f64> {
        let [i, j, k] = self.coords(idx);
        self.origin
            + Vector3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5) * self.voxel_size
    }

    pub fn fill(&mut self, state: Occupancy) {
        self.states.fill(state);
    }

    pub fn count(&self, state: Occupancy) -> usize {
        self.states.iter().filter(|&&s| s == state).count()
    }

    /// Centres of all occupied voxels.
    pub fn occupied_centers(&self) -> impl Iterator<Item = Point3<f64>> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == Occupancy::Occupied)
            .map(|(idx, _)| self.center(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn index_and_coords_agree() {
        let grid = VoxelGrid::new(&GridSpec {
            origin: [0.0; 3],
            voxel_size: 1.0,
            dims: [4, 3, 2],
        });
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.count(Occupancy::Unknown), 24);
        for idx in 0..grid.len() {
            let [i, j, k] = grid.coords(idx);
            assert_eq!(grid.index(i, j, k), Some(idx));
        }
        assert_eq!(grid.index(4, 0, 0), None);
    }

    #[test]
    fn centers_are_offset_by_half_a_voxel() {
        let grid = VoxelGrid::new(&GridSpec {
            origin: [10.0, -5.0, 0.0],
            voxel_size: 2.0,
            dims: [3, 3, 3],
        });
        let idx = grid.index(1, 2, 0).unwrap();
        assert_relative_eq!(grid.center(idx), Point3::new(13.0, 0.0, 1.0));
    }
}
