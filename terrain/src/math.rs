use num_traits::Float;

/// Returns the up/down angle (in radians) from a viewer at elevation
/// `h1` to a target at elevation `h2`, `distance_m` along the surface
/// on a sphere of `earth_radius`.
///
/// Spherical triangle with the earth's center:
/// `theta = d / R`, the viewer at `R + h1`, the target at `R + h2`
/// projected onto the horizontal plane through the viewer; cosine
/// rule for the viewer-target chord, then the sine rule for the
/// angle. The sign is negative when the target sits below the
/// viewer's horizontal.
pub(crate) fn elevation_angle<T>(h1: T, distance_m: T, h2: T, earth_radius: T) -> T
where
    T: Float,
{
    let two = T::one() + T::one();
    let theta = distance_m / earth_radius;
    let od = (earth_radius + h1) / theta.cos();
    let ad = (earth_radius + h1) * theta.tan();
    let bd = od - (earth_radius + h2);
    let ab = (ad.powi(2) + bd.powi(2) - two * ad * bd * theta.sin()).sqrt();
    // coincident points
    if ab == T::zero() {
        return T::zero();
    }
    -((bd * theta.cos()) / ab).asin()
}

#[cfg(test)]
mod tests {
    use super::elevation_angle;
    use approx::assert_relative_eq;
    use gridfloat::geodesy::EARTH_RADIUS_M;

    #[test]
    fn test_level_terrain_dips_below_horizontal() {
        // equal elevations: the angle is the curvature dip, -d / 2R
        let d = 10_000.0;
        assert_relative_eq!(
            elevation_angle(1_000.0, d, 1_000.0, EARTH_RADIUS_M),
            -d / (2.0 * EARTH_RADIUS_M),
            max_relative = 1e-3
        );
    }

    #[test]
    fn test_sign_follows_relative_height() {
        let up = elevation_angle(0.0, 10_000.0, 500.0, EARTH_RADIUS_M);
        let down = elevation_angle(500.0, 10_000.0, 0.0, EARTH_RADIUS_M);
        assert!(up > 0.0);
        assert!(down < 0.0);
        // a raised target subtends roughly atan(rise / run)
        assert_relative_eq!(up, (500.0_f64 / 10_000.0).atan(), max_relative = 2e-2);
    }

    #[test]
    fn test_coincident_points() {
        assert_eq!(elevation_angle(100.0, 0.0, 100.0, EARTH_RADIUS_M), 0.0);
    }
}
