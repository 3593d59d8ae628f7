use serde::{Deserialize, Serialize};

use crate::drainage::DrainageGraph;
use crate::error::{Error, Result};
use crate::geometry::Point;




/**
 * Soil and geology parameters of an element. Conductivities are in metres
 * per minute inside the model.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Soil {
    /// Horizontal saturated conductivity of the aquifer
    pub kh: f64,
    /// Vertical saturated conductivity, drives recharge
    pub kv: f64,
    /// Conductivity of the infiltration layer
    pub kinf: f64,
    pub porosity: f64,
    /// van Genuchten shape parameter n (> 1)
    pub beta: f64,
    /// Areal fraction of macropores
    #[serde(default)]
    pub macropore_fraction: f64,
    #[serde(default)]
    pub macropore_conductivity: f64,
    /// Thickness of the layer over which the infiltration gradient acts
    pub infiltration_depth: f64,
}




/**
 * Vegetation and surface cover parameters of an element.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandCover {
    /// Manning roughness for overland flow, min / m^(1/3)
    pub roughness: f64,
    pub vegetation_fraction: f64,
    pub root_depth: f64,
    /// Canopy storage capacity per unit leaf area index, m
    pub interception_coeff: f64,
    /// Relative saturation above which transpiration is unstressed
    pub stress_saturation: f64,
}




/**
 * Condition imposed on an element face that has no neighbor element.
 * Fixed heads are elevations; fixed fluxes are m^3 / min, positive into the
 * element.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryCondition {
    NoFlow,
    FixedHead { head: f64 },
    FixedFlux { rate: f64 },
}

impl Default for BoundaryCondition {
    fn default() -> Self {
        BoundaryCondition::NoFlow
    }
}




#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Neighbor {
    Element(usize),
    Boundary(BoundaryCondition),
}




#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Face {
    pub neighbor: Neighbor,
    pub edge_length: f64,
    /// Distance between the two centroids, or from the centroid to the edge
    /// on a boundary face
    pub distance: f64,
}




#[derive(Clone, Debug)]
pub struct Element {
    pub area: f64,
    pub centroid: Point,
    /// Bedrock elevation
    pub zmin: f64,
    /// Land surface elevation
    pub zmax: f64,
    pub faces: [Face; 3],
    pub soil: Soil,
    pub land_cover: LandCover,
    /// Index of the forcing station driving this element
    pub station: usize,
}

impl Element {
    pub fn aquifer_depth(&self) -> f64 {
        self.zmax - self.zmin
    }
}




/**
 * Channel cross-section. Depths are measured from the channel bed; a
 * trapezoid's side slope is horizontal run per unit rise.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Rectangle { width: f64 },
    Trapezoid { bottom_width: f64, side_slope: f64 },
}

impl Shape {
    pub fn area(&self, depth: f64) -> f64 {
        match *self {
            Shape::Rectangle { width } => width * depth,
            Shape::Trapezoid { bottom_width, side_slope } => (bottom_width + side_slope * depth) * depth,
        }
    }

    pub fn wetted_perimeter(&self, depth: f64) -> f64 {
        match *self {
            Shape::Rectangle { width } => width + 2.0 * depth,
            Shape::Trapezoid { bottom_width, side_slope } => {
                bottom_width + 2.0 * depth * (1.0 + side_slope * side_slope).sqrt()
            }
        }
    }

    pub fn top_width(&self, depth: f64) -> f64 {
        match *self {
            Shape::Rectangle { width } => width,
            Shape::Trapezoid { bottom_width, side_slope } => bottom_width + 2.0 * side_slope * depth,
        }
    }

    pub fn bed_width(&self) -> f64 {
        match *self {
            Shape::Rectangle { width } => width,
            Shape::Trapezoid { bottom_width, .. } => bottom_width,
        }
    }
}




/**
 * How water leaves a segment with no downstream segment.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outlet {
    /// No water leaves the network here
    Closed,
    /// Stage held at the given depth just below the outlet
    FixedStage { stage: f64 },
    /// Water surface parallel to the bed, with the given slope
    ZeroDepthGradient { slope: f64 },
    CriticalDepth,
}




#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Downstream {
    Segment(usize),
    Outlet(Outlet),
}




/**
 * An element that borders a river segment, and the horizontal distance from
 * its centroid to the channel.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bank {
    pub element: usize,
    pub distance: f64,
}




#[derive(Clone, Debug)]
pub struct RiverSegment {
    pub length: f64,
    /// Channel bed elevation
    pub zbed: f64,
    /// Bottom of the aquifer below the channel bed
    pub zmin: f64,
    pub shape: Shape,
    /// Bank height above the bed
    pub depth: f64,
    pub roughness: f64,
    pub weir_coefficient: f64,
    pub bank_conductivity: f64,
    pub bed_conductivity: f64,
    pub bed_thickness: f64,
    pub bed_porosity: f64,
    /// Left and right banks
    pub banks: [Option<Bank>; 2],
    pub downstream: Downstream,
}

impl RiverSegment {
    pub fn bank_elevation(&self) -> f64 {
        self.zbed + self.depth
    }

    pub fn bed_aquifer_depth(&self) -> f64 {
        self.zbed - self.bed_thickness - self.zmin
    }
}




/**
 * A pair of neighboring elements. Each pair appears once, with a < b.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Link {
    pub a: usize,
    pub b: usize,
    pub edge_length: f64,
    pub distance: f64,
}




/**
 * An element face carrying a condition other than no-flow.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryFace {
    pub element: usize,
    pub condition: BoundaryCondition,
    pub edge_length: f64,
    pub distance: f64,
}




/**
 * The immutable mesh and topology model: elements, river segments and the
 * connectivity derived from them. Construction validates everything; a
 * `Mesh` that exists is consistent.
 */
#[derive(Clone, Debug)]
pub struct Mesh {
    elements: Vec<Element>,
    rivers: Vec<RiverSegment>,
    links: Vec<Link>,
    boundary_faces: Vec<BoundaryFace>,
    upstream: Vec<Vec<usize>>,
    drainage_order: Vec<usize>,
}




// ============================================================================
impl Mesh {

    pub fn new(elements: Vec<Element>, rivers: Vec<RiverSegment>) -> Result<Self> {
        for (i, e) in elements.iter().enumerate() {
            validate_element(i, e, elements.len())?;
        }
        for (r, segment) in rivers.iter().enumerate() {
            validate_segment(r, segment, elements.len(), rivers.len())?;
        }
        let links: Vec<Link> = collect_links(&elements)?
            .into_iter()
            .filter(|link| !rivers.iter().any(|s| separates(s, link)))
            .collect();
        let boundary_faces = collect_boundary_faces(&elements);

        let graph = drainage_graph(&rivers);
        let drainage_order = graph
            .topological_order()
            .map_err(|r| Error::mesh(format!("river segment {} is part of a drainage cycle", r)))?;
        let upstream = (0..rivers.len())
            .map(|r| {
                let mut up: Vec<_> = graph.upstream(&r).cloned().collect();
                up.sort_unstable();
                up
            })
            .collect();

        Ok(Self {
            elements,
            rivers,
            links,
            boundary_faces,
            upstream,
            drainage_order,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn num_rivers(&self) -> usize {
        self.rivers.len()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, i: usize) -> &Element {
        &self.elements[i]
    }

    pub fn rivers(&self) -> &[RiverSegment] {
        &self.rivers
    }

    pub fn river(&self, r: usize) -> &RiverSegment {
        &self.rivers[r]
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn boundary_faces(&self) -> &[BoundaryFace] {
        &self.boundary_faces
    }

    /// Segments draining directly into segment r, in ascending order.
    pub fn upstream(&self, r: usize) -> &[usize] {
        &self.upstream[r]
    }

    /// River segments ordered from headwaters to outlets.
    pub fn drainage_order(&self) -> &[usize] {
        &self.drainage_order
    }

    pub fn total_area(&self) -> f64 {
        self.elements.iter().map(|e| e.area).sum()
    }
}




// ============================================================================
fn validate_element(i: usize, e: &Element, num_elements: usize) -> Result<()> {
    let positive = |value: f64, what: &str| {
        if value > 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(Error::mesh(format!("element {}: {} must be positive, got {}", i, what, value)))
        }
    };

    positive(e.area, "area")?;
    positive(e.aquifer_depth(), "aquifer depth")?;
    positive(e.soil.kh, "horizontal conductivity")?;
    positive(e.soil.kv, "vertical conductivity")?;
    positive(e.soil.kinf, "infiltration conductivity")?;
    positive(e.soil.infiltration_depth, "infiltration depth")?;
    positive(e.land_cover.roughness, "roughness")?;

    if !(e.soil.porosity > 0.0 && e.soil.porosity <= 1.0) {
        return Err(Error::mesh(format!("element {}: porosity {} outside (0, 1]", i, e.soil.porosity)));
    }
    if e.soil.beta <= 1.0 {
        return Err(Error::mesh(format!("element {}: van Genuchten n must exceed 1", i)));
    }
    if !(0.0..=1.0).contains(&e.soil.macropore_fraction) || !(0.0..=1.0).contains(&e.land_cover.vegetation_fraction) {
        return Err(Error::mesh(format!("element {}: fractions must lie in [0, 1]", i)));
    }

    for face in &e.faces {
        positive(face.edge_length, "edge length")?;
        positive(face.distance, "face distance")?;

        if let Neighbor::Element(j) = face.neighbor {
            if j >= num_elements || j == i {
                return Err(Error::mesh(format!("element {}: invalid neighbor {}", i, j)));
            }
        }
    }
    Ok(())
}

fn collect_links(elements: &[Element]) -> Result<Vec<Link>> {
    let mut links = Vec::new();

    for (a, e) in elements.iter().enumerate() {
        for face in &e.faces {
            if let Neighbor::Element(b) = face.neighbor {
                let reciprocal = elements[b]
                    .faces
                    .iter()
                    .find(|f| f.neighbor == Neighbor::Element(a))
                    .ok_or_else(|| Error::mesh(format!("element {} lists {} as neighbor but not vice versa", a, b)))?;

                if (reciprocal.edge_length - face.edge_length).abs() > 1e-6 * face.edge_length {
                    return Err(Error::mesh(format!("elements {} and {} disagree on their shared edge", a, b)));
                }
                if a < b {
                    links.push(Link {
                        a,
                        b,
                        edge_length: face.edge_length,
                        distance: face.distance,
                    })
                }
            }
        }
    }
    Ok(links)
}

/**
 * Whether the segment runs along the edge shared by the link's elements. The
 * two banks then exchange water only through the channel.
 */
fn separates(segment: &RiverSegment, link: &Link) -> bool {
    match segment.banks {
        [Some(left), Some(right)] => {
            (left.element, right.element) == (link.a, link.b) || (left.element, right.element) == (link.b, link.a)
        }
        _ => false,
    }
}

fn collect_boundary_faces(elements: &[Element]) -> Vec<BoundaryFace> {
    elements
        .iter()
        .enumerate()
        .flat_map(|(i, e)| {
            e.faces.iter().filter_map(move |face| match face.neighbor {
                Neighbor::Boundary(BoundaryCondition::NoFlow) | Neighbor::Element(_) => None,
                Neighbor::Boundary(condition) => Some(BoundaryFace {
                    element: i,
                    condition,
                    edge_length: face.edge_length,
                    distance: face.distance,
                }),
            })
        })
        .collect()
}

fn validate_segment(r: usize, s: &RiverSegment, num_elements: usize, num_rivers: usize) -> Result<()> {
    let positive = |value: f64, what: &str| {
        if value > 0.0 && value.is_finite() {
            Ok(())
        } else {
            Err(Error::mesh(format!("river {}: {} must be positive, got {}", r, what, value)))
        }
    };

    positive(s.length, "length")?;
    positive(s.shape.bed_width(), "bed width")?;
    positive(s.depth, "bank height")?;
    positive(s.roughness, "roughness")?;
    positive(s.bed_thickness, "bed thickness")?;
    positive(s.bed_aquifer_depth(), "bed aquifer depth")?;

    if let Shape::Trapezoid { side_slope, .. } = s.shape {
        if !(side_slope >= 0.0 && side_slope.is_finite()) {
            return Err(Error::mesh(format!("river {}: side slope must be non-negative, got {}", r, side_slope)));
        }
    }
    if !(s.bed_porosity > 0.0 && s.bed_porosity <= 1.0) {
        return Err(Error::mesh(format!("river {}: bed porosity outside (0, 1]", r)));
    }
    for bank in s.banks.iter().flatten() {
        if bank.element >= num_elements {
            return Err(Error::mesh(format!("river {}: bank element {} does not exist", r, bank.element)));
        }
        positive(bank.distance, "bank distance")?;
    }
    if let Downstream::Segment(d) = s.downstream {
        if d >= num_rivers || d == r {
            return Err(Error::mesh(format!("river {}: invalid downstream segment {}", r, d)));
        }
    }
    Ok(())
}

fn drainage_graph(rivers: &[RiverSegment]) -> DrainageGraph<usize> {
    let mut graph = DrainageGraph::new();

    for (r, segment) in rivers.iter().enumerate() {
        match segment.downstream {
            Downstream::Segment(d) => graph.insert(r, d),
            Downstream::Outlet(_) => graph.insert_vertex(r),
        }
    }
    graph
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::testing;

    #[test]
    fn two_cell_mesh_has_one_link() {
        let mesh = testing::two_cell_mesh();
        assert_eq!(mesh.num_elements(), 2);
        assert_eq!(mesh.links().len(), 1);
        assert_eq!(mesh.links()[0].a, 0);
        assert_eq!(mesh.links()[0].b, 1);
        assert!(mesh.boundary_faces().is_empty());
    }

    #[test]
    fn one_sided_neighbors_are_rejected() {
        let mut elements = testing::two_cell_mesh().elements().to_vec();
        elements[1].faces[0].neighbor = Neighbor::Boundary(BoundaryCondition::NoFlow);
        assert!(matches!(Mesh::new(elements, vec![]), Err(Error::Mesh(_))));
    }

    #[test]
    fn drainage_cycles_are_rejected() {
        let mesh = testing::two_cell_mesh();
        let a = testing::segment(Downstream::Segment(1));
        let b = testing::segment(Downstream::Segment(0));
        let result = Mesh::new(mesh.elements().to_vec(), vec![a, b]);
        assert!(matches!(result, Err(Error::Mesh(message)) if message.contains("cycle")));
    }

    #[test]
    fn upstream_segments_are_recorded() {
        let mesh = testing::two_cell_mesh();
        let rivers = vec![
            testing::segment(Downstream::Segment(2)),
            testing::segment(Downstream::Segment(2)),
            testing::segment(Downstream::Outlet(Outlet::Closed)),
        ];
        let mesh = Mesh::new(mesh.elements().to_vec(), rivers).unwrap();
        assert_eq!(mesh.upstream(2), &[0, 1]);
        assert!(mesh.upstream(0).is_empty());
        assert_eq!(mesh.drainage_order().last(), Some(&2));
    }

    #[test]
    fn overhanging_trapezoids_are_rejected() {
        let elements = testing::two_cell_mesh().elements().to_vec();
        let mut channel = testing::segment(Downstream::Outlet(Outlet::Closed));
        channel.shape = Shape::Trapezoid { bottom_width: 2.0, side_slope: -1.0 };

        let result = Mesh::new(elements.clone(), vec![channel.clone()]);
        assert!(matches!(result, Err(Error::Mesh(message)) if message.contains("side slope")));

        channel.shape = Shape::Trapezoid { bottom_width: 2.0, side_slope: f64::NAN };
        assert!(Mesh::new(elements.clone(), vec![channel.clone()]).is_err());

        channel.shape = Shape::Trapezoid { bottom_width: 2.0, side_slope: 0.0 };
        assert!(Mesh::new(elements, vec![channel]).is_ok());
    }

    #[test]
    fn river_banks_are_not_linked_across_the_channel() {
        let mesh = testing::river_mesh();
        let linked = |a, b| mesh.links().iter().any(|l| (l.a, l.b) == (a, b));

        assert!(!linked(0, 1));
        assert!(!linked(2, 3));
        assert!(!mesh.links().is_empty());

        let plain = testing::two_cell_mesh();
        let mut channel = testing::segment(Downstream::Outlet(Outlet::Closed));
        channel.banks = [Some(Bank { element: 1, distance: 30.0 }), Some(Bank { element: 0, distance: 30.0 })];
        let crossed = Mesh::new(plain.elements().to_vec(), vec![channel]).unwrap();
        assert!(crossed.links().is_empty());
    }

    #[test]
    fn cross_sections_are_consistent() {
        let rect = Shape::Rectangle { width: 2.0 };
        assert_eq!(rect.area(0.5), 1.0);
        assert_eq!(rect.wetted_perimeter(0.5), 3.0);

        let trap = Shape::Trapezoid { bottom_width: 2.0, side_slope: 1.0 };
        assert_eq!(trap.area(1.0), 3.0);
        assert_eq!(trap.top_width(1.0), 4.0);
        assert!((trap.wetted_perimeter(1.0) - (2.0 + 2.0 * 2f64.sqrt())).abs() < 1e-12);
    }
}
