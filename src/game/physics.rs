//! Projectile physics and distance queries
//!
//! Stand-in for an engine physics collaborator: bombs fly ballistically over a
//! flat ground plane and report a [`Bounce`] every time they hit it.

use glam::Vec3;

/// Height of the ground plane
pub const GROUND_Z: f32 = 0.0;

/// Ballistic constants for thrown projectiles
#[derive(Debug, Clone, Copy)]
pub struct ProjectileStats {
    /// Downward acceleration (units/s²)
    pub gravity: f32,
    /// Fraction of vertical speed kept after a bounce
    pub restitution: f32,
    /// Fraction of horizontal speed lost per bounce
    pub friction: f32,
    /// Below this speed after a bounce the projectile comes to rest
    pub rest_speed: f32,
}

impl Default for ProjectileStats {
    fn default() -> Self {
        Self {
            gravity: 980.0,
            restitution: 0.6,
            friction: 0.2,
            rest_speed: 20.0,
        }
    }
}

/// Impact reported to the entity that hit the ground
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounce {
    pub impact_point: Vec3,
    pub impact_velocity: Vec3,
}

/// Physics system for updating projectiles
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate one step. Returns the bounce if the projectile hit the ground
    /// during this step.
    pub fn step_projectile(
        location: &mut Vec3,
        velocity: &mut Vec3,
        dt: f32,
        stats: &ProjectileStats,
    ) -> Option<Bounce> {
        if *velocity == Vec3::ZERO && location.z <= GROUND_Z {
            return None;
        }

        velocity.z -= stats.gravity * dt;
        *location += *velocity * dt;

        if location.z > GROUND_Z || velocity.z >= 0.0 {
            return None;
        }

        let impact_velocity = *velocity;
        location.z = GROUND_Z;

        velocity.z = -velocity.z * stats.restitution;
        velocity.x *= 1.0 - stats.friction;
        velocity.y *= 1.0 - stats.friction;
        if velocity.length() < stats.rest_speed {
            *velocity = Vec3::ZERO;
        }

        Some(Bounce {
            impact_point: *location,
            impact_velocity,
        })
    }

    /// Inclusive sphere test: distance <= radius counts as inside
    pub fn within_radius(center: Vec3, point: Vec3, radius: f32) -> bool {
        center.distance_squared(point) <= radius * radius
    }
}
