//! SO(3) helpers shared by the process and measurement models.
//!
//! Quaternions follow the Hamilton convention. Raw 4-vectors are stored
//! scalar first, `(w, x, y, z)`, which is *not* nalgebra's internal order,
//! so always go through [`quaternion_from_wxyz`] and [`quaternion_to_wxyz`].

use nalgebra::{Matrix3, Quaternion, RealField, UnitQuaternion, Vector3, Vector4};

/// Below this rotation angle the series coefficients are evaluated by their
/// Taylor expansion instead of the closed form.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-1;

/// The order `n` of [`rotation_series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesOrder {
    /// `Γ0`, the rotation increment `Exp(ω dt)` itself.
    Zeroth,
    /// `Γ1`, the left Jacobian scaled by `dt`. Couples gyro bias into orientation.
    First,
    /// `Γ2`, orientation / gyro bias noise cross term.
    Second,
    /// `Γ3`, gyro bias random walk seen by the orientation.
    Third,
}

impl SeriesOrder {
    #[inline]
    const fn n(self) -> i32 {
        match self {
            Self::Zeroth => 0,
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
        }
    }
}

/// Builds a quaternion from a scalar-first 4-vector.
#[inline]
pub fn quaternion_from_wxyz<T: RealField>(wxyz: &Vector4<T>) -> Quaternion<T> {
    Quaternion::new(
        wxyz[0].clone(),
        wxyz[1].clone(),
        wxyz[2].clone(),
        wxyz[3].clone(),
    )
}

/// Flattens a quaternion into a scalar-first 4-vector.
#[inline]
pub fn quaternion_to_wxyz<T: RealField>(q: &Quaternion<T>) -> Vector4<T> {
    Vector4::new(q.w.clone(), q.i.clone(), q.j.clone(), q.k.clone())
}

/// The rotation matrix of `q`.
#[inline]
pub fn quaternion_to_rotation_matrix<T: RealField>(q: &UnitQuaternion<T>) -> Matrix3<T> {
    q.clone().to_rotation_matrix().into_inner()
}

/// Hamilton product `a ⊗ b`.
#[inline]
pub fn compose_quaternions<T: RealField>(
    a: &UnitQuaternion<T>,
    b: &UnitQuaternion<T>,
) -> UnitQuaternion<T> {
    // renormalize so that repeated composition does not drift off the unit sphere
    UnitQuaternion::new_normalize(a.quaternion() * b.quaternion())
}

/// Maps a rotation vector (axis times angle) to its unit quaternion.
///
/// The zero vector maps to the identity.
#[inline]
pub fn exponential_map<T: RealField>(rotation_vector: &Vector3<T>) -> UnitQuaternion<T> {
    UnitQuaternion::from_scaled_axis(rotation_vector.clone())
}

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew_symmetric<T: RealField>(v: &Vector3<T>) -> Matrix3<T> {
    v.cross_matrix()
}

/// Evaluates the rotation series
///
/// ```text
/// Γn(ω, dt) = Σ_i dt^(i+n) / (i+n)! [ω]×^i
///           = dt^n ( I/n! + a_n(θ) [φ]× + b_n(θ) [φ]×² ),   φ = ω dt, θ = |φ|
/// ```
///
/// `Γ0` is the Rodrigues formula, the higher orders are its successive
/// integrals over the sampling interval.
pub fn rotation_series<T: RealField>(omega: &Vector3<T>, dt: T, order: SeriesOrder) -> Matrix3<T> {
    let phi = omega * dt.clone();
    let theta = phi.norm();
    let n = order.n();

    let (a, b) = series_coefficients(theta, n);

    let skew_phi = skew_symmetric(&phi);
    let skew_phi_sq = &skew_phi * &skew_phi;

    let identity_coeff = factorial::<T>(n).recip();
    (Matrix3::identity() * identity_coeff + skew_phi * a + skew_phi_sq * b) * dt.powi(n)
}

/// Coefficients of `[φ]×` and `[φ]×²` in `Γn`.
fn series_coefficients<T: RealField>(theta: T, n: i32) -> (T, T) {
    if theta < nalgebra::convert(SMALL_ANGLE_THRESHOLD) {
        // Σ_k (-θ²)^k / (n + 2k + 1)!  and  Σ_k (-θ²)^k / (n + 2k + 2)!
        let theta_sq = theta.clone() * theta;
        let taylor = |first: i32| {
            factorial::<T>(first).recip() - theta_sq.clone() / factorial::<T>(first + 2)
                + theta_sq.clone() * theta_sq.clone() / factorial::<T>(first + 4)
        };
        return (taylor(n + 1), taylor(n + 2));
    }

    let one = T::one();
    let half: T = nalgebra::convert(0.5);
    let sixth: T = nalgebra::convert(1.0 / 6.0);
    let sin = theta.clone().sin();
    let cos = theta.clone().cos();
    let t2 = theta.clone() * theta.clone();
    let t3 = t2.clone() * theta.clone();

    match n {
        0 => (sin / theta, (one - cos) / t2),
        1 => ((one - cos) / t2, (theta - sin) / t3),
        2 => ((theta - sin) / t3, (t2.clone() * half + cos - one) / (t2.clone() * t2)),
        _ => (
            (t2.clone() * half + cos - one) / (t2.clone() * t2.clone()),
            (t3.clone() * sixth - theta + sin) / (t3 * t2),
        ),
    }
}

#[inline]
fn factorial<T: RealField>(n: i32) -> T {
    nalgebra::convert((1..=n).map(f64::from).product::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    type TestT = f64;

    fn truncated_series(omega: &Vector3<TestT>, dt: TestT, n: i32) -> Matrix3<TestT> {
        let skew_omega = skew_symmetric(omega);
        let mut power = Matrix3::identity();
        let mut sum = Matrix3::zeros();
        for i in 0..30 {
            sum += power * (dt.powi(i + n) / factorial::<TestT>(i + n));
            power *= skew_omega;
        }
        sum
    }

    #[test]
    fn test_rotation_matrix_orthonormal() {
        let q = UnitQuaternion::from_euler_angles(0.3, -1.1, 2.4);
        let r = quaternion_to_rotation_matrix(&q);

        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wxyz_layout() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let wxyz = quaternion_to_wxyz(&q);

        assert_eq!(wxyz, Vector4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(quaternion_from_wxyz(&wxyz), q);
    }

    #[test]
    fn test_compose_identity() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let identity = UnitQuaternion::identity();

        assert_relative_eq!(compose_quaternions(&identity, &q), q, epsilon = 1e-12);
        assert_relative_eq!(compose_quaternions(&q, &identity), q, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_is_rotation_product() {
        let a = UnitQuaternion::from_euler_angles(0.4, 0.0, -0.2);
        let b = UnitQuaternion::from_euler_angles(-0.1, 0.7, 0.3);

        let ab = quaternion_to_rotation_matrix(&compose_quaternions(&a, &b));
        let expected = quaternion_to_rotation_matrix(&a) * quaternion_to_rotation_matrix(&b);
        assert_relative_eq!(ab, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_exponential_map_zero() {
        let q = exponential_map(&Vector3::<TestT>::zeros());
        assert_eq!(q, UnitQuaternion::identity());
    }

    #[test]
    fn test_exponential_map_axis_angle() {
        let q = exponential_map(&Vector3::new(0.0, 0.0, core::f64::consts::FRAC_PI_2));
        let r = quaternion_to_rotation_matrix(&q);

        assert_relative_eq!(r * Vector3::x(), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        assert_relative_eq!(skew_symmetric(&v) * u, v.cross(&u), epsilon = 1e-12);
        assert_relative_eq!(
            skew_symmetric(&v),
            -skew_symmetric(&v).transpose(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_zeroth_order_is_rodrigues() {
        let omega = Vector3::new(0.4, -1.3, 2.2);
        let dt = 0.5;

        let expected = quaternion_to_rotation_matrix(&exponential_map(&(omega * dt)));
        assert_relative_eq!(
            rotation_series(&omega, dt, SeriesOrder::Zeroth),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_series_matches_truncated_sum() {
        let orders = [
            SeriesOrder::Zeroth,
            SeriesOrder::First,
            SeriesOrder::Second,
            SeriesOrder::Third,
        ];
        // one large angle for the closed form, one small for the expansion
        for (omega, dt) in [
            (Vector3::new(0.9, -0.4, 1.7), 0.4),
            (Vector3::new(0.02, 0.01, -0.03), 0.01),
        ] {
            for order in orders {
                let expected = truncated_series(&omega, dt, order.n());
                assert_relative_eq!(
                    rotation_series(&omega, dt, order),
                    expected,
                    epsilon = 1e-10
                );
            }
        }
    }

    #[test]
    fn test_series_zero_rate() {
        let dt: TestT = 0.01;
        let zero = Vector3::zeros();

        assert_relative_eq!(
            rotation_series(&zero, dt, SeriesOrder::First),
            Matrix3::identity() * dt,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            rotation_series(&zero, dt, SeriesOrder::Third),
            Matrix3::identity() * dt.powi(3) / 6.0,
            epsilon = 1e-15
        );
    }
}
