//! Flux laws between control volumes. Every function here is pure; depths
//! handed in are expected to be carrier depths, i.e. already reduced by the
//! minimum-depth floor. Volumetric rates are m^3 / min, specific rates are
//! m / min, and a positive result flows from the first control volume named
//! in the arguments to the second.

use crate::mesh::Shape;

/// Gravitational acceleration in m / min^2.
pub const GRAVITY: f64 = 9.81 * 3600.0;

/// Gradients smaller than this are in the linear, regularized regime of
/// `signed_sqrt`.
pub const GRADIENT_REGULARIZATION: f64 = 1e-6;




/**
 * Signed square root, regularized so that it passes smoothly through zero:
 * g / (g^2 + eps^2)^(1/4). Flux laws that scale like the square root of a
 * gradient use this so their magnitude fades continuously to zero where the
 * gradient changes sign.
 */
pub fn signed_sqrt(g: f64) -> f64 {
    let eps = GRADIENT_REGULARIZATION;
    g / (g * g + eps * eps).sqrt().sqrt()
}

/**
 * Depth available to carry a flux: the part of `h` above the floor. Returns
 * zero below the floor, and bumps `floored` when some water is present but
 * too little to move.
 */
pub fn carrier_depth(h: f64, floor: f64, floored: &mut u64) -> f64 {
    let d = h - floor;

    if d > 0.0 {
        d
    } else {
        if h > 0.0 {
            *floored += 1
        }
        0.0
    }
}

/**
 * Smooth switch in [0, 1) that rises from zero with the carrier depth. Used
 * to fade out sinks as a store empties.
 */
pub fn availability(carrier: f64, floor: f64) -> f64 {
    if carrier <= 0.0 {
        0.0
    } else {
        carrier / (carrier + floor)
    }
}




// ============================================================================
/**
 * Diffusion-wave overland flow across an edge (Manning). `depth` is the
 * carrier depth on the upwind side.
 */
pub fn overland(gradient: f64, depth: f64, edge_length: f64, roughness: f64) -> f64 {
    if depth <= 0.0 {
        0.0
    } else {
        edge_length * depth.powf(5.0 / 3.0) / roughness * signed_sqrt(gradient)
    }
}

/**
 * Darcy flow through a saturated section of the given thickness and width.
 */
pub fn darcy(gradient: f64, conductivity: f64, thickness: f64, width: f64) -> f64 {
    conductivity * thickness.max(0.0) * width * gradient
}

/**
 * Manning flow in a channel, for a flow depth `depth` above the bed of the
 * given cross-section.
 */
pub fn channel(gradient: f64, depth: f64, shape: &Shape, roughness: f64) -> f64 {
    if depth <= 0.0 {
        return 0.0;
    }
    let area = shape.area(depth);
    let radius = area / shape.wetted_perimeter(depth);
    area * radius.powf(2.0 / 3.0) / roughness * signed_sqrt(gradient)
}

/**
 * Outflow at critical depth through a channel end.
 */
pub fn critical_outflow(depth: f64, shape: &Shape) -> f64 {
    if depth <= 0.0 {
        return 0.0;
    }
    let area = shape.area(depth);
    area * (GRAVITY * area / shape.top_width(depth)).sqrt()
}

/**
 * Drowned broad-crested weir between two water levels over a common crest.
 * Only the level above the crest on the upstream side drives flow, and the
 * rate fades to zero as the two levels meet.
 */
pub fn weir(head_a: f64, head_b: f64, crest: f64, width: f64, coefficient: f64) -> f64 {
    let over = (head_a.max(head_b) - crest).max(0.0);

    if over == 0.0 {
        0.0
    } else {
        coefficient * width * (2.0 * GRAVITY).sqrt() * over * signed_sqrt(head_a - head_b)
    }
}




// ============================================================================
/**
 * van Genuchten-Mualem relative conductivity for effective saturation `se`
 * and shape parameter `n`.
 */
pub fn relative_conductivity(se: f64, n: f64) -> f64 {
    let se = se.clamp(0.0, 1.0);
    let m = 1.0 - 1.0 / n;
    let inner = 1.0 - (1.0 - se.powf(1.0 / m)).powf(m);
    se.sqrt() * inner * inner
}

/**
 * Infiltration rate from ponded water into the unsaturated zone, m / min.
 * `ponded` is the carrier depth of surface water, `room` the fraction of the
 * infiltration layer still able to take water.
 */
pub fn infiltration(ponded: f64, capacity: f64, room: f64, floor: f64) -> f64 {
    capacity * availability(ponded, floor) * room.clamp(0.0, 1.0)
}

/**
 * Gravity drainage from the unsaturated zone to the water table, m / min.
 * `moisture` is the carrier storage of the unsaturated zone and `space` the
 * unsaturated thickness between the water table and the surface.
 */
pub fn recharge(moisture: f64, space: f64, kv: f64, n: f64, floor: f64) -> f64 {
    if moisture <= 0.0 {
        return 0.0;
    }
    let se = if space > floor { moisture / space } else { 1.0 };
    kv * relative_conductivity(se, n) * availability(moisture, floor)
}

/**
 * Return flow of groundwater standing above the land surface, m / min.
 */
pub fn exfiltration(groundwater: f64, aquifer_depth: f64, kinf: f64, infiltration_depth: f64) -> f64 {
    kinf * (groundwater - aquifer_depth).max(0.0) / infiltration_depth
}

/**
 * Fraction of transpiration demand that can be met from the water table,
 * rising linearly as the water table enters the root zone.
 */
pub fn root_zone_access(water_table_depth: f64, root_depth: f64) -> f64 {
    if root_depth <= 0.0 {
        0.0
    } else {
        ((root_depth - water_table_depth) / root_depth).clamp(0.0, 1.0)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn signed_sqrt_is_odd_and_continuous() {
        assert_eq!(signed_sqrt(0.0), 0.0);
        assert_eq!(signed_sqrt(0.04), -signed_sqrt(-0.04));
        assert!((signed_sqrt(0.04) - 0.2).abs() < 1e-6);
        assert!(signed_sqrt(1e-12).abs() < 1e-8);
        assert!(signed_sqrt(-1e-12) < 0.0);
    }

    #[test]
    fn carrier_depth_counts_floored_water() {
        let mut floored = 0;
        assert_eq!(carrier_depth(1e-6, 1e-5, &mut floored), 0.0);
        assert_eq!(carrier_depth(0.0, 1e-5, &mut floored), 0.0);
        assert_eq!(carrier_depth(-1.0, 1e-5, &mut floored), 0.0);
        assert!((carrier_depth(0.1, 1e-5, &mut floored) - (0.1 - 1e-5)).abs() < 1e-15);
        assert_eq!(floored, 1);
    }

    #[test]
    fn overland_flow_follows_the_head_gradient() {
        let downhill = overland(0.01, 0.1, 10.0, 0.05);
        let uphill = overland(-0.01, 0.1, 10.0, 0.05);
        assert!(downhill > 0.0);
        assert_eq!(downhill, -uphill);
        assert_eq!(overland(0.01, 0.0, 10.0, 0.05), 0.0);
        assert_eq!(overland(0.0, 0.1, 10.0, 0.05), 0.0);
    }

    #[test]
    fn weir_fades_as_levels_meet() {
        let q = weir(10.2, 10.0, 10.0, 5.0, 0.6);
        assert!(q > 0.0);
        assert!(weir(10.0, 10.2, 10.0, 5.0, 0.6) < 0.0);
        assert_eq!(weir(9.0, 8.0, 10.0, 5.0, 0.6), 0.0);
        assert!(weir(10.2, 10.2 - 1e-12, 10.0, 5.0, 0.6).abs() < 1e-3);
    }

    #[test]
    fn relative_conductivity_spans_zero_to_one() {
        assert_eq!(relative_conductivity(0.0, 2.0), 0.0);
        assert!((relative_conductivity(1.0, 2.0) - 1.0).abs() < 1e-12);
        let half = relative_conductivity(0.5, 2.0);
        assert!(half > 0.0 && half < 1.0);
        assert!(relative_conductivity(0.8, 2.0) > half);
    }

    #[test]
    fn dry_surface_does_not_infiltrate() {
        let mut floored = 0;
        let ponded = carrier_depth(5e-6, 1e-5, &mut floored);
        let rate = infiltration(ponded, 1e-3, 1.0, 1e-5);
        assert_eq!(rate, 0.0);
        assert!(rate.is_finite());
        assert_eq!(floored, 1);
    }

    #[test]
    fn saturated_soil_does_not_infiltrate() {
        assert_eq!(infiltration(0.1, 1e-3, 0.0, 1e-5), 0.0);
        assert!(infiltration(0.1, 1e-3, 1.0, 1e-5) > 0.0);
    }

    #[test]
    fn recharge_needs_moisture() {
        assert_eq!(recharge(0.0, 1.0, 1e-3, 2.0, 1e-5), 0.0);
        assert!(recharge(0.5, 1.0, 1e-3, 2.0, 1e-5) > 0.0);
        assert!(recharge(0.5, 0.0, 1e-3, 2.0, 1e-5).is_finite());
    }

    #[test]
    fn critical_outflow_vanishes_when_dry() {
        let shape = Shape::Rectangle { width: 2.0 };
        assert_eq!(critical_outflow(0.0, &shape), 0.0);
        assert!(critical_outflow(0.5, &shape) > 0.0);
    }

    #[test]
    fn root_zone_access_is_linear() {
        assert_eq!(root_zone_access(2.0, 1.0), 0.0);
        assert_eq!(root_zone_access(0.5, 1.0), 0.5);
        assert_eq!(root_zone_access(0.0, 1.0), 1.0);
    }
}
