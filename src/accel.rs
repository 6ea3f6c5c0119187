//! Triangle mesh acceleration structure.
//!
//! Owns a [`TriangleMesh`] and the BVH built over it, and turns raw
//! primitive hits into shading-ready [`SurfaceHit`]s.

use crate::bvh::{BuildConfig, Bvh, BvhStats, OptimizeReport, OptimizerConfig};
use crate::geom::{Ray, TriangleIntersector, TriangleMesh};
use crate::util::{Real, Result, Vector2, Vector3};

/// Closest hit on a mesh, with interpolated attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Index of the triangle in the mesh.
    pub triangle_index: usize,
    pub mesh_index: u32,
    pub distance: Real,
    /// Barycentric coordinates of `v1` and `v2`.
    pub u: Real,
    pub v: Real,
    pub position: Vector3,
    /// Unit geometric normal, facing against the ray.
    pub geometric_normal: Vector3,
    /// Interpolated vertex normal, or the geometric normal when the
    /// triangle has none.
    pub normal: Vector3,
    pub uv: Option<Vector2>,
}

/// BVH over a triangle mesh.
#[derive(Debug, Clone)]
pub struct AccelerationStructure {
    mesh: TriangleMesh,
    bvh: Bvh,
    optimize_report: Option<OptimizeReport>,
}

impl AccelerationStructure {
    /// Builds the BVH over `mesh`, then runs the reinsertion optimizer when
    /// `optimizer` is given.
    #[tracing::instrument(skip_all, fields(triangle_count = mesh.len()))]
    pub fn new(
        mesh: TriangleMesh,
        config: &BuildConfig,
        optimizer: Option<&OptimizerConfig>,
    ) -> Result<Self> {
        let bboxes = mesh.bounding_boxes();
        let centers = mesh.centers();
        let mut bvh = Bvh::build(&bboxes, &centers, config)?;
        let optimize_report = match optimizer {
            Some(optimizer) => Some(bvh.optimize(optimizer)?),
            None => None,
        };
        tracing::info!(
            triangles = mesh.len(),
            nodes = bvh.node_count(),
            sah_cost = bvh.sah_cost(),
            "acceleration structure ready"
        );
        Ok(Self {
            mesh,
            bvh,
            optimize_report,
        })
    }

    pub fn mesh(&self) -> &TriangleMesh {
        &self.mesh
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn optimize_report(&self) -> Option<&OptimizeReport> {
        self.optimize_report.as_ref()
    }

    pub fn stats(&self) -> BvhStats {
        self.bvh.stats()
    }

    /// Checks the BVH against the mesh's triangle bounds.
    pub fn validate(&self) -> Result<()> {
        self.bvh.validate(&self.mesh.bounding_boxes())
    }

    /// Closest intersection of `ray` within `[ray.tmin, ray.tmax]`.
    pub fn raycast(&self, ray: &Ray) -> Option<SurfaceHit> {
        let intersector = TriangleIntersector::new(self.mesh.triangles());
        let (triangle_index, hit) = self.bvh.intersect_closest(ray, &intersector)?;

        let triangle = &self.mesh.triangles()[triangle_index];
        let attributes = &self.mesh.attributes()[triangle_index];
        let w = 1.0 - hit.u - hit.v;

        let mut geometric_normal = triangle.normal().normalize_or_zero();
        if geometric_normal.dot(ray.direction) > 0.0 {
            geometric_normal = -geometric_normal;
        }
        let normal = attributes
            .normals
            .map(|[n0, n1, n2]| (n0 * w + n1 * hit.u + n2 * hit.v).normalize_or_zero())
            .filter(|n| *n != Vector3::ZERO)
            .unwrap_or(geometric_normal);
        let uv = attributes
            .uvs
            .map(|[t0, t1, t2]| t0 * w + t1 * hit.u + t2 * hit.v);

        Some(SurfaceHit {
            triangle_index,
            mesh_index: attributes.mesh_index,
            distance: hit.distance,
            u: hit.u,
            v: hit.v,
            position: ray.at(hit.distance),
            geometric_normal,
            normal,
            uv,
        })
    }

    /// Whether anything blocks `ray` within its interval.
    pub fn occluded(&self, ray: &Ray) -> bool {
        let intersector = TriangleIntersector::new(self.mesh.triangles());
        self.bvh.intersect_any(ray, &intersector)
    }
}
