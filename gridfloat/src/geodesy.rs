//! Spherical-earth geodesy.
//!
//! Great-circle formulas from
//! <http://www.movable-type.co.uk/scripts/latlong.html>, specialized
//! to a sphere of fixed radius. No geoid model and no horizontal
//! datum transforms; for terrain work within a few hundred km of a
//! point the spherical approximation is ample.

use geo::geometry::Coord;

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Returns the great-circle (haversine) distance between `a` and `b`
/// in meters.
///
/// Coordinates are in degrees, `x` longitude and `y` latitude.
pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let delta_phi_2 = (b.y - a.y).to_radians() / 2.0;
    let delta_lambda_2 = (b.x - a.x).to_radians() / 2.0;
    let h = delta_phi_2.sin().powi(2)
        + a.y.to_radians().cos() * b.y.to_radians().cos() * delta_lambda_2.sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Returns the initial compass bearing, in degrees `[0, 360)`, for a
/// planar grid offset of `dx` cells east and `dy` cells north of
/// center.
///
/// Pure horizontal/vertical offsets return 0/90/180/270 exactly, and
/// the degenerate `(0, 0)` offset returns 0.
pub fn bearing_for_offset(dx: i32, dy: i32) -> f64 {
    let ax = f64::from(dx.abs());
    let ay = f64::from(dy.abs());

    match (dx.signum(), dy.signum()) {
        (0, 0) | (0, 1) => 0.0,
        (0, _) => 180.0,
        (1, 0) => 90.0,
        (-1, 0) => 270.0,
        // one octant branch per quadrant keeps the arctangent
        // argument in [0, 1]
        (1, 1) => {
            if ay > ax {
                (ax / ay).atan().to_degrees()
            } else {
                90.0 - (ay / ax).atan().to_degrees()
            }
        }
        (1, _) => {
            if ax > ay {
                90.0 + (ay / ax).atan().to_degrees()
            } else {
                180.0 - (ax / ay).atan().to_degrees()
            }
        }
        (_, -1) => {
            if ax < ay {
                180.0 + (ax / ay).atan().to_degrees()
            } else {
                270.0 - (ay / ax).atan().to_degrees()
            }
        }
        _ => {
            if ax > ay {
                270.0 + (ay / ax).atan().to_degrees()
            } else {
                360.0 - (ax / ay).atan().to_degrees()
            }
        }
    }
}

/// Returns the point reached by travelling `distance_m` meters along
/// the surface from `origin` at an initial bearing of `bearing_deg`
/// degrees clockwise from north.
pub fn destination(origin: Coord<f64>, bearing_deg: f64, distance_m: f64) -> Coord<f64> {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.y.to_radians();
    let lon1 = origin.x.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    Coord {
        x: lon2.to_degrees(),
        y: lat2.to_degrees(),
    }
}

/// Returns, in meters, how far the sphere has fallen away from the
/// tangent plane at the origin after `distance_m` meters of arc.
///
/// Subtracting this from a raw elevation expresses the value as a
/// height relative to a fixed vertical at the origin rather than a
/// raw geoid height.
pub fn curvature_correction(distance_m: f64) -> f64 {
    (1.0 - (distance_m / EARTH_RADIUS_M).cos()) * EARTH_RADIUS_M
}
