use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{self, Point};
use crate::mesh::{BoundaryCondition, Element, Face, LandCover, Neighbor, Soil};




/**
 * A mesh vertex, with the bedrock and land surface elevations at that
 * location.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub x: f64,
    pub y: f64,
    pub zmin: f64,
    pub zmax: f64,
}

impl Node {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}




/**
 * A triangle of the mesh, given by three node indices. Edge k joins node k
 * to node k + 1 (mod 3); `boundary[k]` applies to edge k when no other
 * triangle shares it.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub nodes: [usize; 3],
    #[serde(default)]
    pub soil: usize,
    #[serde(default)]
    pub land_cover: usize,
    #[serde(default)]
    pub station: usize,
    #[serde(default)]
    pub boundary: [BoundaryCondition; 3],
}

impl Triangle {
    pub fn edge(&self, k: usize) -> (usize, usize) {
        (self.nodes[k], self.nodes[(k + 1) % 3])
    }
}




/**
 * Build the elements of a triangulation: geometry from the nodes, and
 * neighbors from shared edges. An edge may be shared by at most two
 * triangles.
 */
pub fn elements(nodes: &[Node], triangles: &[Triangle], soils: &[Soil], land_covers: &[LandCover]) -> Result<Vec<Element>> {
    let mut edges: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();

    for (t, triangle) in triangles.iter().enumerate() {
        if let Some(&n) = triangle.nodes.iter().find(|&&n| n >= nodes.len()) {
            return Err(Error::mesh(format!("triangle {} refers to missing node {}", t, n)));
        }
        if triangle.soil >= soils.len() || triangle.land_cover >= land_covers.len() {
            return Err(Error::mesh(format!("triangle {} refers to a missing soil or land cover", t)));
        }
        for k in 0..3 {
            let (a, b) = triangle.edge(k);
            edges.entry((a.min(b), a.max(b))).or_default().push((t, k));
        }
    }

    let mut neighbors = vec![[None; 3]; triangles.len()];

    for (&(a, b), sharing) in &edges {
        match sharing.as_slice() {
            [_] => {}
            [(t0, k0), (t1, k1)] => {
                neighbors[*t0][*k0] = Some(*t1);
                neighbors[*t1][*k1] = Some(*t0);
            }
            _ => {
                return Err(Error::mesh(format!(
                    "edge ({}, {}) is shared by {} triangles",
                    a,
                    b,
                    sharing.len())));
            }
        }
    }

    let centroids: Vec<Point> = triangles
        .iter()
        .map(|t| geometry::centroid(nodes[t.nodes[0]].point(), nodes[t.nodes[1]].point(), nodes[t.nodes[2]].point()))
        .collect();

    triangles
        .iter()
        .enumerate()
        .map(|(t, triangle)| {
            let [p0, p1, p2] = triangle.nodes.map(|n| nodes[n].point());
            let area = geometry::signed_area(p0, p1, p2).abs();

            if area == 0.0 {
                return Err(Error::mesh(format!("triangle {} is degenerate", t)));
            }

            let faces = [0, 1, 2].map(|k| {
                let (a, b) = triangle.edge(k);
                let (a, b) = (nodes[a].point(), nodes[b].point());

                match neighbors[t][k] {
                    Some(other) => Face {
                        neighbor: Neighbor::Element(other),
                        edge_length: a.distance(b),
                        distance: centroids[t].distance(centroids[other]),
                    },
                    None => Face {
                        neighbor: Neighbor::Boundary(triangle.boundary[k]),
                        edge_length: a.distance(b),
                        distance: geometry::distance_to_line(centroids[t], a, b),
                    },
                }
            });

            let mean = |f: fn(&Node) -> f64| triangle.nodes.iter().map(|&n| f(&nodes[n])).sum::<f64>() / 3.0;

            Ok(Element {
                area,
                centroid: centroids[t],
                zmin: mean(|n| n.zmin),
                zmax: mean(|n| n.zmax),
                faces,
                soil: soils[triangle.soil],
                land_cover: land_covers[triangle.land_cover],
                station: triangle.station,
            })
        })
        .collect()
}




/**
 * Triangulate a rectangle of `nx` by `ny` cells of size `dx` by `dy`, each
 * cell split into two triangles along its diagonal. The land surface is
 * given by `surface(x, y)` and the aquifer has uniform thickness `depth`.
 * Every outer edge is closed. Cell (i, j) holds triangles `2 (j nx + i)` and
 * `2 (j nx + i) + 1`.
 */
pub fn rectangle<F>(nx: usize, ny: usize, dx: f64, dy: f64, depth: f64, surface: F) -> (Vec<Node>, Vec<Triangle>)
where
    F: Fn(f64, f64) -> f64,
{
    let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1));

    for j in 0..=ny {
        for i in 0..=nx {
            let (x, y) = (i as f64 * dx, j as f64 * dy);
            let zmax = surface(x, y);
            nodes.push(Node { x, y, zmin: zmax - depth, zmax })
        }
    }

    let node = |i: usize, j: usize| j * (nx + 1) + i;
    let triangle = |nodes: [usize; 3]| Triangle {
        nodes,
        soil: 0,
        land_cover: 0,
        station: 0,
        boundary: Default::default(),
    };
    let mut triangles = Vec::with_capacity(2 * nx * ny);

    for j in 0..ny {
        for i in 0..nx {
            triangles.push(triangle([node(i, j), node(i + 1, j), node(i + 1, j + 1)]));
            triangles.push(triangle([node(i, j), node(i + 1, j + 1), node(i, j + 1)]));
        }
    }
    (nodes, triangles)
}
