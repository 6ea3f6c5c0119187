//! Triangle soup with per-triangle shading attributes.
//!
//! The BVH only ever reads positions (through bounding boxes, centers and the
//! intersector). Normals, texture coordinates and the owning mesh index ride
//! along so a hit can be shaded without a second lookup structure.

use rayon::prelude::*;

use crate::geom::Triangle;
use crate::util::{Aabb, Error, Result, Vector2, Vector3};

/// Shading attributes of one triangle, vertex order matching the triangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TriangleAttributes {
    pub normals: Option<[Vector3; 3]>,
    pub uvs: Option<[Vector2; 3]>,
    /// Index of the source mesh this triangle was imported from.
    pub mesh_index: u32,
}

/// Triangles plus index-aligned attributes.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    triangles: Vec<Triangle>,
    attributes: Vec<TriangleAttributes>,
    mesh_count: u32,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mesh from bare positions; every triangle belongs to mesh 0.
    pub fn from_triangles(triangles: Vec<Triangle>) -> Self {
        let attributes = vec![TriangleAttributes::default(); triangles.len()];
        let mesh_count = u32::from(!triangles.is_empty());
        Self {
            triangles,
            attributes,
            mesh_count,
        }
    }

    /// Append an indexed mesh as a new source mesh.
    ///
    /// `normals` and `uvs`, when present, are indexed by the same vertex
    /// indices as `positions`. Returns the mesh index assigned to it.
    pub fn add_indexed(
        &mut self,
        positions: &[Vector3],
        indices: &[[u32; 3]],
        normals: Option<&[Vector3]>,
        uvs: Option<&[Vector2]>,
    ) -> Result<u32> {
        let mesh_index = self.mesh_count;
        let fetch = |slice: &[Vector3], i: u32| -> Result<Vector3> {
            slice.get(i as usize).copied().ok_or(Error::VertexOutOfBounds {
                index: i as usize,
                count: slice.len(),
            })
        };

        let mut triangles = Vec::with_capacity(indices.len());
        let mut attributes = Vec::with_capacity(indices.len());
        for &[a, b, c] in indices {
            let tri = Triangle::new(
                fetch(positions, a)?,
                fetch(positions, b)?,
                fetch(positions, c)?,
            );
            let normals = match normals {
                Some(n) => Some([fetch(n, a)?, fetch(n, b)?, fetch(n, c)?]),
                None => None,
            };
            let uvs = match uvs {
                Some(t) => {
                    let get = |i: u32| {
                        t.get(i as usize).copied().ok_or(Error::VertexOutOfBounds {
                            index: i as usize,
                            count: t.len(),
                        })
                    };
                    Some([get(a)?, get(b)?, get(c)?])
                }
                None => None,
            };
            triangles.push(tri);
            attributes.push(TriangleAttributes {
                normals,
                uvs,
                mesh_index,
            });
        }
        self.triangles.append(&mut triangles);
        self.attributes.append(&mut attributes);
        self.mesh_count += 1;
        Ok(mesh_index)
    }

    /// Append one triangle with explicit attributes.
    pub fn push(&mut self, triangle: Triangle, attributes: TriangleAttributes) {
        self.mesh_count = self.mesh_count.max(attributes.mesh_index.saturating_add(1));
        self.triangles.push(triangle);
        self.attributes.push(attributes);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Number of source meshes appended so far.
    pub fn mesh_count(&self) -> u32 {
        self.mesh_count
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn attributes(&self) -> &[TriangleAttributes] {
        &self.attributes
    }

    /// Per-triangle bounding boxes, computed in parallel.
    pub fn bounding_boxes(&self) -> Vec<Aabb> {
        self.triangles.par_iter().map(Triangle::bounding_box).collect()
    }

    /// Per-triangle centroids, computed in parallel.
    pub fn centers(&self) -> Vec<Vector3> {
        self.triangles.par_iter().map(Triangle::center).collect()
    }

    /// Bounds of the whole mesh.
    pub fn bounds(&self) -> Aabb {
        self.triangles
            .par_iter()
            .map(Triangle::bounding_box)
            .reduce(|| Aabb::EMPTY, |a, b| a.union(&b))
    }
}

impl From<Vec<Triangle>> for TriangleMesh {
    fn from(triangles: Vec<Triangle>) -> Self {
        Self::from_triangles(triangles)
    }
}
