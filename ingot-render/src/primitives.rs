//! Procedural meshes registered under well-known GUIDs.
//!
//! Everything is Z-up, with counter-clockwise front faces.

use crate::{
    cache::{MeshCache, MeshIdentifier},
    static_object::{
        ColorSlots, Index, StaticObject, VertexNormals, VertexPosition, VertexTextureCoordinate,
    },
};
use glam::{Vec2, Vec3};
use ingot_asset::AssetGuid;
use std::f32::consts::{FRAC_PI_2, PI, TAU};

pub const BOX_GUID: AssetGuid = AssetGuid(0x5b7d_a8f2_1c34_4e0b_9d1a_6f0e_2c81_b301);
pub const PLANE_GUID: AssetGuid = AssetGuid(0x5b7d_a8f2_1c34_4e0b_9d1a_6f0e_2c81_b302);
pub const TRIANGLE_GUID: AssetGuid = AssetGuid(0x5b7d_a8f2_1c34_4e0b_9d1a_6f0e_2c81_b303);
pub const SPHERE_GUID: AssetGuid = AssetGuid(0x5b7d_a8f2_1c34_4e0b_9d1a_6f0e_2c81_b304);
pub const CYLINDER_GUID: AssetGuid = AssetGuid(0x5b7d_a8f2_1c34_4e0b_9d1a_6f0e_2c81_b305);

const SPHERE_LATITUDES: u32 = 16;
const SPHERE_LONGITUDES: u32 = 32;
const CYLINDER_SIDES: u32 = 32;

const QUAD_CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

#[derive(Default)]
struct Builder {
    positions: Vec<VertexPosition>,
    normals: Vec<VertexNormals>,
    texture_coordinates: Vec<VertexTextureCoordinate>,
    indices: Vec<Index>,
}

impl Builder {
    fn vertex(&mut self, position: Vec3, normal: Vec3, tangent: Vec3, uv: Vec2) -> Index {
        let index = self.positions.len() as Index;
        self.positions.push(position.to_array());
        self.normals.push(VertexNormals {
            normal: normal.to_array(),
            tangent: tangent.extend(1.0).to_array(),
        });
        self.texture_coordinates.push(uv.to_array());
        index
    }

    fn triangle(&mut self, a: Index, b: Index, c: Index) {
        self.indices.extend([a, b, c]);
    }

    fn build(self) -> StaticObject {
        let mut object = StaticObject::new(
            self.positions.len() as u32,
            self.indices.len() as u32,
            ColorSlots::NONE,
        );
        object.positions_mut().copy_from_slice(&self.positions);
        object.normals_mut().copy_from_slice(&self.normals);
        object
            .texture_coordinates_mut()
            .copy_from_slice(&self.texture_coordinates);
        object.indices_mut().copy_from_slice(&self.indices);
        let bounding_box = object.compute_bounding_box();
        object.set_bounding_box(bounding_box);
        object
    }
}

/// Axis-aligned box with 4 vertices per face.
pub fn box_object(half_extent: Vec3) -> StaticObject {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::NEG_X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];
    let mut builder = Builder::default();
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = builder.positions.len() as Index;
        for (u, v) in QUAD_CORNERS {
            let position = (normal + tangent * u + bitangent * v) * half_extent;
            let uv = Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5);
            builder.vertex(position, normal, tangent, uv);
        }
        builder.triangle(base, base + 1, base + 2);
        builder.triangle(base, base + 2, base + 3);
    }
    builder.build()
}

/// Quad in the XY plane facing +Z.
pub fn plane(half_size: Vec2) -> StaticObject {
    let mut builder = Builder::default();
    for (u, v) in QUAD_CORNERS {
        let position = Vec3::new(u * half_size.x, v * half_size.y, 0.0);
        let uv = Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5);
        builder.vertex(position, Vec3::Z, Vec3::X, uv);
    }
    builder.triangle(0, 1, 2);
    builder.triangle(0, 2, 3);
    builder.build()
}

pub fn triangle() -> StaticObject {
    let mut builder = Builder::default();
    builder.vertex(Vec3::new(-0.5, -0.5, 0.0), Vec3::Z, Vec3::X, Vec2::new(0.0, 1.0));
    builder.vertex(Vec3::new(0.5, -0.5, 0.0), Vec3::Z, Vec3::X, Vec2::new(1.0, 1.0));
    builder.vertex(Vec3::new(0.0, 0.5, 0.0), Vec3::Z, Vec3::X, Vec2::new(0.5, 0.0));
    builder.triangle(0, 1, 2);
    builder.build()
}

/// UV sphere around the origin. The seam and the poles have duplicated vertices.
pub fn sphere(radius: f32, latitudes: u32, longitudes: u32) -> StaticObject {
    assert!(radius > 0.0);
    assert!(latitudes >= 2 && longitudes >= 3);
    let mut builder = Builder::default();
    for i in 0..=latitudes {
        let latitude = FRAC_PI_2 - i as f32 * PI / latitudes as f32;
        let (z, ring) = latitude.sin_cos();
        for j in 0..=longitudes {
            let longitude = j as f32 * TAU / longitudes as f32;
            let (sin, cos) = longitude.sin_cos();
            let normal = Vec3::new(ring * cos, ring * sin, z);
            let tangent = Vec3::new(-sin, cos, 0.0);
            let uv = Vec2::new(j as f32 / longitudes as f32, i as f32 / latitudes as f32);
            builder.vertex(normal * radius, normal, tangent, uv);
        }
    }
    for i in 0..latitudes {
        let mut k1 = i * (longitudes + 1);
        let mut k2 = k1 + longitudes + 1;
        for _ in 0..longitudes {
            if i != 0 {
                builder.triangle(k1, k2, k1 + 1);
            }
            if i != latitudes - 1 {
                builder.triangle(k1 + 1, k2, k2 + 1);
            }
            k1 += 1;
            k2 += 1;
        }
    }
    builder.build()
}

/// Capped cylinder along Z, centered at the origin.
pub fn cylinder(radius: f32, half_height: f32, sides: u32) -> StaticObject {
    assert!(radius > 0.0 && half_height > 0.0);
    assert!(sides >= 3);
    let direction = |side: u32| {
        let (sin, cos) = (side as f32 * TAU / sides as f32).sin_cos();
        Vec3::new(cos, sin, 0.0)
    };
    let mut builder = Builder::default();

    for (ring, z) in [-half_height, half_height].into_iter().enumerate() {
        for side in 0..=sides {
            let normal = direction(side);
            let tangent = Vec3::new(-normal.y, normal.x, 0.0);
            let uv = Vec2::new(side as f32 / sides as f32, 1.0 - ring as f32);
            builder.vertex(normal * radius + Vec3::Z * z, normal, tangent, uv);
        }
    }
    for side in 0..sides {
        let (bottom, top) = (side, side + sides + 1);
        builder.triangle(bottom, bottom + 1, top + 1);
        builder.triangle(bottom, top + 1, top);
    }

    for z in [-half_height, half_height] {
        let normal = Vec3::Z * z.signum();
        let center = builder.vertex(Vec3::Z * z, normal, Vec3::X, Vec2::splat(0.5));
        for side in 0..sides {
            let rim = direction(side);
            let uv = Vec2::new(0.5 + 0.5 * rim.x, 0.5 - 0.5 * rim.y);
            builder.vertex(rim * radius + Vec3::Z * z, normal, Vec3::X, uv);
        }
        for side in 0..sides {
            let current = center + 1 + side;
            let next = center + 1 + (side + 1) % sides;
            if z > 0.0 {
                builder.triangle(center, current, next);
            } else {
                builder.triangle(center, next, current);
            }
        }
    }
    builder.build()
}

/// Identifiers of the built-in procedural meshes.
#[derive(Clone, Copy, Debug)]
pub struct ProceduralMeshes {
    pub cube: MeshIdentifier,
    pub plane: MeshIdentifier,
    pub triangle: MeshIdentifier,
    pub sphere: MeshIdentifier,
    pub cylinder: MeshIdentifier,
}

impl MeshCache {
    /// Register the built-in shapes. Repeated calls return the same identifiers.
    pub fn create_procedural_meshes(&self) -> ProceduralMeshes {
        let meshes = ProceduralMeshes {
            cube: self.find_or_register_procedural(BOX_GUID, || box_object(Vec3::splat(0.5))),
            plane: self.find_or_register_procedural(PLANE_GUID, || plane(Vec2::splat(0.5))),
            triangle: self.find_or_register_procedural(TRIANGLE_GUID, triangle),
            sphere: self.find_or_register_procedural(SPHERE_GUID, || {
                sphere(0.5, SPHERE_LATITUDES, SPHERE_LONGITUDES)
            }),
            cylinder: self.find_or_register_procedural(CYLINDER_GUID, || {
                cylinder(0.5, 0.5, CYLINDER_SIDES)
            }),
        };
        log::info!("Registered procedural meshes: {:?}", meshes);
        meshes
    }
}
