use core::ops::Range;
use serde::Serialize;

use crate::mesh::Mesh;




/**
 * Identifier for a physical quantity carried in the state vector
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Quantity {
    /// Ponded surface water depth on an element
    Surface,
    /// Unsaturated zone storage, as equivalent saturated thickness
    Unsaturated,
    /// Groundwater head above the element bedrock
    Groundwater,
    /// River stage above the channel bed
    Stage,
    /// Head of the aquifer below a channel, above its bottom
    RiverBed,
}

impl Quantity {
    pub const ALL: [Quantity; 5] = [
        Quantity::Surface,
        Quantity::Unsaturated,
        Quantity::Groundwater,
        Quantity::Stage,
        Quantity::RiverBed,
    ];

    pub fn is_element_quantity(&self) -> bool {
        matches!(self, Quantity::Surface | Quantity::Unsaturated | Quantity::Groundwater)
    }
}




/**
 * The mapping between the flat state vector and the named quantities of each
 * element and river segment. Quantities are stored in contiguous blocks, in
 * the order of `Quantity::ALL`. The layout is fixed once a run starts; every
 * other module goes through it rather than computing offsets by hand.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct StateLayout {
    num_elements: usize,
    num_rivers: usize,
}




// ============================================================================
impl StateLayout {

    pub fn new(num_elements: usize, num_rivers: usize) -> Self {
        Self { num_elements, num_rivers }
    }

    pub fn for_mesh(mesh: &Mesh) -> Self {
        Self::new(mesh.num_elements(), mesh.num_rivers())
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_rivers(&self) -> usize {
        self.num_rivers
    }

    /**
     * Return the total length of the state vector.
     */
    pub fn size(&self) -> usize {
        3 * self.num_elements + 2 * self.num_rivers
    }

    /**
     * Return the number of entities carrying the given quantity.
     */
    pub fn count(&self, quantity: Quantity) -> usize {
        if quantity.is_element_quantity() {
            self.num_elements
        } else {
            self.num_rivers
        }
    }

    pub fn range(&self, quantity: Quantity) -> Range<usize> {
        let ne = self.num_elements;
        let nr = self.num_rivers;
        let start = match quantity {
            Quantity::Surface => 0,
            Quantity::Unsaturated => ne,
            Quantity::Groundwater => 2 * ne,
            Quantity::Stage => 3 * ne,
            Quantity::RiverBed => 3 * ne + nr,
        };
        start..start + self.count(quantity)
    }

    /**
     * Return the position of a quantity of the given entity. An id outside
     * the mesh is a programming error and panics.
     */
    pub fn index_of(&self, quantity: Quantity, id: usize) -> usize {
        let range = self.range(quantity);

        if id >= range.len() {
            panic!(
                "{:?} index {} out of range ({} entities)",
                quantity,
                id,
                range.len());
        }
        range.start + id
    }

    pub fn block<'a>(&self, quantity: Quantity, data: &'a [f64]) -> &'a [f64] {
        &data[self.range(quantity)]
    }

    pub fn block_mut<'a>(&self, quantity: Quantity, data: &'a mut [f64]) -> &'a mut [f64] {
        &mut data[self.range(quantity)]
    }

    pub fn view<'a>(&'a self, data: &'a [f64]) -> StateView<'a> {
        assert_eq!(data.len(), self.size(), "state vector does not match layout");
        StateView { layout: self, data }
    }

    pub fn zeros(&self) -> Vec<f64> {
        vec![0.0; self.size()]
    }
}




/**
 * Read-only named access into a state (or derivative) vector.
 */
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    layout: &'a StateLayout,
    data: &'a [f64],
}

impl<'a> StateView<'a> {
    pub fn get(&self, quantity: Quantity, id: usize) -> f64 {
        self.data[self.layout.index_of(quantity, id)]
    }

    pub fn surface(&self, i: usize) -> f64 {
        self.get(Quantity::Surface, i)
    }

    pub fn unsaturated(&self, i: usize) -> f64 {
        self.get(Quantity::Unsaturated, i)
    }

    pub fn groundwater(&self, i: usize) -> f64 {
        self.get(Quantity::Groundwater, i)
    }

    pub fn stage(&self, r: usize) -> f64 {
        self.get(Quantity::Stage, r)
    }

    pub fn river_bed(&self, r: usize) -> f64 {
        self.get(Quantity::RiverBed, r)
    }

    pub fn block(&self, quantity: Quantity) -> &'a [f64] {
        self.layout.block(quantity, self.data)
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}




/**
 * Volume of water per unit change of each state entry (m^2) at the given
 * state: the quantity a volumetric flux is divided by to become a rate of
 * change. Only the channel weight depends on the state, through the top
 * width of the cross-section.
 */
pub fn storage_weights(mesh: &Mesh, layout: &StateLayout, data: &[f64]) -> Vec<f64> {
    let y = layout.view(data);
    let mut weights = layout.zeros();

    for (i, e) in mesh.elements().iter().enumerate() {
        weights[layout.index_of(Quantity::Surface, i)] = e.area;
        weights[layout.index_of(Quantity::Unsaturated, i)] = e.area * e.soil.porosity;
        weights[layout.index_of(Quantity::Groundwater, i)] = e.area * e.soil.porosity;
    }
    for (r, s) in mesh.rivers().iter().enumerate() {
        weights[layout.index_of(Quantity::Stage, r)] = s.length * s.shape.top_width(y.stage(r).max(0.0));
        weights[layout.index_of(Quantity::RiverBed, r)] = s.length * s.shape.bed_width() * s.bed_porosity;
    }
    weights
}




/**
 * Volume of water (m^3) held in the state vector: ponded water, pore water
 * of the unsaturated and saturated zones, channel water and pore water below
 * the channels. Negative entries count as empty.
 */
pub fn total_storage(mesh: &Mesh, layout: &StateLayout, data: &[f64]) -> f64 {
    let y = layout.view(data);

    let elements: f64 = mesh
        .elements()
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let pore = e.soil.porosity * (y.unsaturated(i).max(0.0) + y.groundwater(i).max(0.0));
            e.area * (y.surface(i).max(0.0) + pore)
        })
        .sum();

    let rivers: f64 = mesh
        .rivers()
        .iter()
        .enumerate()
        .map(|(r, s)| {
            let channel = s.length * s.shape.area(y.stage(r).max(0.0));
            let bed = s.length * s.shape.bed_width() * s.bed_porosity * y.river_bed(r).max(0.0);
            channel + bed
        })
        .sum();

    elements + rivers
}
