//! Reference processors.
//!
//! Small, engine-agnostic processors that double as examples of the
//! [`ChunkProcessor`] contract: bucketed ids, slice-wise cancellation
//! checks and a size estimate for the cache.

use crate::cancel::CancelCheck;
use crate::error::ProcessError;
use crate::key::ProcessorId;
use crate::processor::ChunkProcessor;
use crate::snapshot::{ChunkSnapshot, SnapshotDims, Voxel};

// =============================================================================
// Occupancy
// =============================================================================

/// Solid voxel count for a chunk. Zero voxels are treated as empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupancy {
	pub solid: usize,
	pub total: usize,
}

impl Occupancy {
	/// All empty or all solid; such chunks produce no surface.
	pub fn is_homogeneous(&self) -> bool {
		self.solid == 0 || self.solid == self.total
	}

	pub fn fill_ratio(&self) -> f32 {
		if self.total == 0 {
			0.0
		} else {
			self.solid as f32 / self.total as f32
		}
	}
}

/// Counts solid voxels.
#[derive(Clone, Copy, Debug, Default)]
pub struct OccupancyProcessor;

impl OccupancyProcessor {
	pub const ID: &'static str = "occupancy";
}

impl ChunkProcessor for OccupancyProcessor {
	type Artifact = Occupancy;

	fn id(&self) -> ProcessorId {
		ProcessorId::new(Self::ID)
	}

	fn process(&self, snapshot: &ChunkSnapshot, cancel: &CancelCheck<'_>) -> Result<Occupancy, ProcessError> {
		let dims = snapshot.dims();
		let slice = dims.x * dims.y;
		let mut solid = 0;
		if slice > 0 {
			for z_slice in snapshot.voxels().chunks(slice) {
				cancel.check()?;
				solid += z_slice.iter().filter(|&&voxel| voxel != 0).count();
			}
		}
		Ok(Occupancy {
			solid,
			total: dims.volume(),
		})
	}

	fn estimated_bytes(&self, _artifact: &Occupancy) -> Option<usize> {
		Some(std::mem::size_of::<Occupancy>())
	}
}

// =============================================================================
// Downsample
// =============================================================================

/// Coarser copy of a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Downsampled {
	pub dims: SnapshotDims,
	pub voxels: Vec<Voxel>,
}

/// Supported downsample factors. Each factor has its own processor id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DownsampleFactor {
	X2,
	X4,
}

impl DownsampleFactor {
	pub fn stride(&self) -> usize {
		match self {
			Self::X2 => 2,
			Self::X4 => 4,
		}
	}
}

/// Keeps the largest voxel value of every `stride³` block, so any solid
/// voxel survives into the coarse level.
#[derive(Clone, Copy, Debug)]
pub struct DownsampleProcessor {
	pub factor: DownsampleFactor,
}

impl DownsampleProcessor {
	pub fn new(factor: DownsampleFactor) -> Self {
		Self { factor }
	}
}

impl ChunkProcessor for DownsampleProcessor {
	type Artifact = Downsampled;

	fn id(&self) -> ProcessorId {
		match self.factor {
			DownsampleFactor::X2 => ProcessorId::new("downsample-2x"),
			DownsampleFactor::X4 => ProcessorId::new("downsample-4x"),
		}
	}

	fn process(&self, snapshot: &ChunkSnapshot, cancel: &CancelCheck<'_>) -> Result<Downsampled, ProcessError> {
		let stride = self.factor.stride();
		let src = snapshot.dims();
		let dims = SnapshotDims::new(src.x.div_ceil(stride), src.y.div_ceil(stride), src.z.div_ceil(stride));
		let mut voxels = vec![0; dims.volume()];

		for z in 0..src.z {
			cancel.check()?;
			for y in 0..src.y {
				for x in 0..src.x {
					let coarse = dims.index(x / stride, y / stride, z / stride);
					voxels[coarse] = voxels[coarse].max(snapshot.get(x, y, z));
				}
			}
		}

		Ok(Downsampled { dims, voxels })
	}

	fn estimated_bytes(&self, artifact: &Downsampled) -> Option<usize> {
		Some(artifact.voxels.len() * std::mem::size_of::<Voxel>())
	}
}
