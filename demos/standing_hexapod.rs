use hexapod_eskf::{
    Config, ContactMeasurement, ImuMeasured, LeggedOdometry, UpdateStatus,
    systems::legged::{BiasSample, CONTACT_COUNT},
};
use nalgebra::{Matrix3xX, Matrix4, Translation3, Vector3};

fn jitter(scale: f64) -> Vector3<f64> {
    Vector3::from_fn(|_, _| rand::random_range(-scale..scale))
}

fn standing_poses() -> [Matrix4<f64>; CONTACT_COUNT] {
    std::array::from_fn(|leg| {
        let angle = leg as f64 * std::f64::consts::FRAC_PI_3;
        Translation3::new(0.4 * angle.cos(), 0.3 * angle.sin(), -0.25).to_homogeneous()
    })
}

fn main() -> anyhow::Result<()> {
    let imu_interval = 0.002;
    let mut odometry = LeggedOdometry::new(Config::default())?;

    for _ in 0..200 {
        odometry.record_bias(BiasSample::new(jitter(0.01), jitter(0.001)))?;
    }
    odometry.initialize(&standing_poses())?;

    let jacobians: [Matrix3xX<f64>; CONTACT_COUNT] =
        std::array::from_fn(|_| Matrix3xX::from_element(3, 0.05));

    let mut applied = 0;
    for cycle in 0..5000 {
        let imu = ImuMeasured::new(
            Vector3::new(0.0, 0.0, 9.8) + jitter(0.05),
            jitter(0.005),
        );

        // kinematics arrive at a tenth of the inertial rate
        let contacts = if cycle % 10 == 0 {
            let poses = standing_poses().map(|pose| {
                Translation3::from(jitter(0.002)).to_homogeneous() * pose
            });
            Some(ContactMeasurement::new(poses, jacobians.clone())?)
        } else {
            None
        };

        if let UpdateStatus::Applied(_) = odometry.step(&imu, imu_interval, contacts.as_ref())? {
            applied += 1;
        }
        if cycle % 1000 == 0 {
            let state = odometry.state();
            dbg!(cycle, state.position.0, state.velocity.0);
            dbg!(odometry.covariance().trace());
        }
    }

    dbg!(applied, odometry.estimate());
    Ok(())
}
