use crate::collision_monitor::CollisionMonitor;
use nalgebra as na;
use parry3d::query::{Ray, RayCast};
use parry3d::shape::{Ball, Capsule, Cuboid, SharedShape};

/// Half extent of the fallback box used for degenerate shapes.
const FALLBACK_HALF_EXTENT: f32 = 0.01;

/// Collider geometry of a scene object.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Box { size: na::Vector3<f32> },
    Sphere { radius: f32 },
    Capsule { radius: f32, height: f32 },
}

/// Map a collider variant to its shape descriptor.
///
/// Degenerate dimensions fall back to a small fixed box.
pub fn shape_descriptor(shape: &ColliderShape) -> SharedShape {
    match shape {
        ColliderShape::Box { size }
            if size.x > 0.0 && size.y > 0.0 && size.z > 0.0 =>
        {
            SharedShape::new(Cuboid::new(size * 0.5))
        }
        ColliderShape::Sphere { radius } if *radius > 0.0 => SharedShape::new(Ball::new(*radius)),
        ColliderShape::Capsule { radius, height } if *radius > 0.0 && *height > 0.0 => {
            SharedShape::new(Capsule::new_y(height * 0.5, *radius))
        }
        _ => SharedShape::new(Cuboid::new(na::Vector3::repeat(FALLBACK_HALF_EXTENT))),
    }
}

/// Surface appearance sampled by the range sensor.
///
/// The checker pattern stands in for a texture lookup on geometry that
/// supports one; plain objects just report their base color.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub base_color: [u8; 3],
    pub checker: Option<Checker>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checker {
    pub color: [u8; 3],
    pub cell_size: f32,
}

impl Material {
    pub fn flat(base_color: [u8; 3]) -> Material {
        Material {
            base_color,
            checker: None,
        }
    }

    pub fn checkered(base_color: [u8; 3], color: [u8; 3], cell_size: f32) -> Material {
        Material {
            base_color,
            checker: Some(Checker { color, cell_size }),
        }
    }

    /// Sample the material at a point in object-local coordinates.
    pub fn sample(&self, local_point: &na::Point3<f32>) -> [u8; 3] {
        match &self.checker {
            Some(checker) if checker.cell_size > 0.0 => {
                let cells = (local_point.x / checker.cell_size).floor() as i64
                    + (local_point.y / checker.cell_size).floor() as i64
                    + (local_point.z / checker.cell_size).floor() as i64;
                if cells.rem_euclid(2) == 0 {
                    self.base_color
                } else {
                    checker.color
                }
            }
            _ => self.base_color,
        }
    }
}

pub struct SceneObject {
    pub name: String,
    pub pose: na::Isometry3<f32>,
    pub shape: ColliderShape,
    pub material: Material,
    pub layer: u32,
    collider: SharedShape,
}

impl SceneObject {
    pub fn new(
        name: &str,
        pose: na::Isometry3<f32>,
        shape: ColliderShape,
        material: Material,
        layer: u32,
    ) -> SceneObject {
        let collider = shape_descriptor(&shape);
        SceneObject {
            name: name.to_owned(),
            pose,
            shape,
            material,
            layer,
            collider,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub point: na::Point3<f32>,
    pub normal: na::Vector3<f32>,
    pub color: [u8; 3],
}

/// The simulated work scene the sensor sees and the arm can collide with.
#[derive(Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new() -> Scene {
        Scene::default()
    }

    pub fn add_object(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// Cast a world-space ray against all objects on the selected layers
    /// and return the nearest hit.
    pub fn cast_ray(
        &self,
        origin: na::Point3<f32>,
        direction: na::Vector3<f32>,
        max_distance: f32,
        layer_mask: u32,
    ) -> Option<RayHit> {
        let ray = Ray::new(origin, direction);
        let mut nearest: Option<(f32, RayHit)> = None;
        for object in self.objects.iter().filter(|object| object.layer & layer_mask != 0) {
            let intersection = match object.collider.cast_ray_and_get_normal(
                &object.pose,
                &ray,
                max_distance,
                true,
            ) {
                Some(intersection) => intersection,
                None => continue,
            };
            if nearest
                .as_ref()
                .map(|(toi, _)| intersection.toi < *toi)
                .unwrap_or(true)
            {
                let point = ray.point_at(intersection.toi);
                let local_point = object.pose.inverse_transform_point(&point);
                nearest = Some((
                    intersection.toi,
                    RayHit {
                        point,
                        normal: intersection.normal,
                        color: object.material.sample(&local_point),
                    },
                ));
            }
        }
        nearest.map(|(_, hit)| hit)
    }

    /// Refresh per-link contact state after a speculative move.
    ///
    /// Stands in for the contact begin/end callback stream of the physics
    /// collaborator: every probe both raises and clears flags.
    pub fn probe_contacts(
        &self,
        links: &[(String, na::Point3<f32>)],
        link_radius: f32,
        monitor: &CollisionMonitor,
    ) {
        let probe = Ball::new(link_radius);
        for (name, point) in links {
            let probe_pose = na::Isometry3::from_parts(
                na::Translation3::from(point.coords),
                na::UnitQuaternion::identity(),
            );
            let mut touching = false;
            for object in &self.objects {
                match parry3d::query::intersection_test(
                    &probe_pose,
                    &probe,
                    &object.pose,
                    &*object.collider,
                ) {
                    Ok(true) => {
                        touching = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        tracing::debug!(
                            "Contact query unsupported for {:?}: {}",
                            object.name,
                            error
                        );
                    }
                }
            }
            monitor.set_contact(name, touching);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn box_at(name: &str, center: na::Vector3<f32>, size: f32, layer: u32) -> SceneObject {
        SceneObject::new(
            name,
            na::Isometry3::translation(center.x, center.y, center.z),
            ColliderShape::Box {
                size: na::Vector3::repeat(size),
            },
            Material::flat([120, 120, 120]),
            layer,
        )
    }

    #[test]
    fn degenerate_shapes_fall_back_to_small_box() {
        let descriptor = shape_descriptor(&ColliderShape::Sphere { radius: -1.0 });
        assert!(descriptor.as_cuboid().is_some());
        let descriptor = shape_descriptor(&ColliderShape::Capsule {
            radius: 0.1,
            height: 0.0,
        });
        assert!(descriptor.as_cuboid().is_some());
    }

    #[test]
    fn valid_shapes_keep_their_variant() {
        let descriptor = shape_descriptor(&ColliderShape::Sphere { radius: 0.2 });
        assert!(descriptor.as_ball().is_some());
        let descriptor = shape_descriptor(&ColliderShape::Capsule {
            radius: 0.1,
            height: 0.4,
        });
        assert!(descriptor.as_capsule().is_some());
    }

    #[test]
    fn ray_hits_nearest_object() {
        let mut scene = Scene::new();
        scene.add_object(box_at("near", na::Vector3::new(0.0, 0.0, 1.0), 0.2, 1));
        scene.add_object(box_at("far", na::Vector3::new(0.0, 0.0, 2.0), 0.2, 1));
        let hit = scene
            .cast_ray(
                na::Point3::origin(),
                na::Vector3::new(0.0, 0.0, 1.0),
                5.0,
                1,
            )
            .unwrap();
        assert_relative_eq!(hit.point.z, 0.9, epsilon = 1.0e-5);
        assert_relative_eq!(hit.normal, na::Vector3::new(0.0, 0.0, -1.0), epsilon = 1.0e-5);
    }

    #[test]
    fn ray_respects_layer_mask() {
        let mut scene = Scene::new();
        scene.add_object(box_at("hidden", na::Vector3::new(0.0, 0.0, 1.0), 0.2, 0b10));
        let hit = scene.cast_ray(
            na::Point3::origin(),
            na::Vector3::new(0.0, 0.0, 1.0),
            5.0,
            0b01,
        );
        assert!(hit.is_none());
    }

    #[test]
    fn checker_material_alternates_cells() {
        let material = Material::checkered([255, 255, 255], [0, 0, 0], 0.1);
        let white = material.sample(&na::Point3::new(0.05, 0.05, 0.05));
        let black = material.sample(&na::Point3::new(0.15, 0.05, 0.05));
        assert_eq!(white, [255, 255, 255]);
        assert_eq!(black, [0, 0, 0]);
    }

    #[test]
    fn probe_sets_and_clears_contacts() {
        let mut scene = Scene::new();
        scene.add_object(box_at("obstacle", na::Vector3::new(0.0, 0.0, 0.5), 0.2, 1));
        let monitor = CollisionMonitor::new(vec!["wrist".to_owned()]);
        let links = vec![("wrist".to_owned(), na::Point3::new(0.0, 0.0, 0.5))];
        scene.probe_contacts(&links, 0.05, &monitor);
        assert!(monitor.any_collision());
        let links = vec![("wrist".to_owned(), na::Point3::new(0.0, 0.0, -0.5))];
        scene.probe_contacts(&links, 0.05, &monitor);
        assert!(!monitor.any_collision());
    }
}
