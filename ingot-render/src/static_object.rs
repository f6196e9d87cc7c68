//! CPU-side mesh geometry and its compact on-disk encoding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use std::{
    io::{self, Read, Write},
    mem,
    ops::Range,
};

pub const VERSION: u16 = 0;
pub const LAST_COMPATIBLE_VERSION: u16 = 0;
pub const COLOR_SLOT_COUNT: usize = 4;

const HEADER_SIZE: u64 = 12;
const BOUNDS_SIZE: u64 = 24;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct StaticObjectFlags: u16 {
        const UINT8_INDICES = 1 << 0;
        const UINT16_INDICES = 1 << 1;
        const HALF_POSITIONS = 1 << 2;
        const HALF_TEXTURE_COORDINATES = 1 << 3;
        const COLOR_SLOT_USED_0 = 1 << 4;
        const COLOR_SLOT_USED_1 = 1 << 5;
        const COLOR_SLOT_USED_2 = 1 << 6;
        const COLOR_SLOT_USED_3 = 1 << 7;
        const COLOR_SLOT_ALPHA_0 = 1 << 8;
        const COLOR_SLOT_ALPHA_1 = 1 << 9;
        const COLOR_SLOT_ALPHA_2 = 1 << 10;
        const COLOR_SLOT_ALPHA_3 = 1 << 11;
        const COLOR_SLOTS = 0xFF0;
    }
}

pub type VertexPosition = [f32; 3];
pub type VertexTextureCoordinate = [f32; 2];
pub type VertexColors = [[u8; 4]; COLOR_SLOT_COUNT];
pub type Index = u32;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexNormals {
    pub normal: [f32; 3],
    /// XYZ direction with the bitangent sign in W.
    pub tangent: [f32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub min: glam::Vec3,
    pub max: glam::Vec3,
}

impl BoundingBox {
    pub fn center(&self) -> glam::Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> glam::Vec3 {
        self.max - self.min
    }
}

/// Which vertex color slots are present, and which of them carry alpha.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ColorSlots(StaticObjectFlags);

impl ColorSlots {
    pub const NONE: Self = Self(StaticObjectFlags::empty());

    pub fn with_slot(self, slot: usize, alpha: bool) -> Self {
        assert!(slot < COLOR_SLOT_COUNT);
        let mut bits = self.0.bits() | (StaticObjectFlags::COLOR_SLOT_USED_0.bits() << slot);
        if alpha {
            bits |= StaticObjectFlags::COLOR_SLOT_ALPHA_0.bits() << slot;
        }
        Self(StaticObjectFlags::from_bits_truncate(bits))
    }

    fn from_flags(flags: StaticObjectFlags) -> Self {
        Self(flags & StaticObjectFlags::COLOR_SLOTS)
    }

    pub fn flags(self) -> StaticObjectFlags {
        self.0
    }

    pub fn is_used(self, slot: usize) -> bool {
        self.0.bits() & (StaticObjectFlags::COLOR_SLOT_USED_0.bits() << slot) != 0
    }

    pub fn has_alpha(self, slot: usize) -> bool {
        self.0.bits() & (StaticObjectFlags::COLOR_SLOT_ALPHA_0.bits() << slot) != 0
    }

    pub fn any(self) -> bool {
        (0..COLOR_SLOT_COUNT).any(|slot| self.is_used(slot))
    }
}

/// Byte ranges of the streams inside the packed storage.
struct Layout {
    positions: Range<usize>,
    normals: Range<usize>,
    texture_coordinates: Range<usize>,
    colors: Range<usize>,
    indices: Range<usize>,
}

impl Layout {
    fn new(vertex_count: u32, index_count: u32, has_colors: bool) -> Self {
        let vc = vertex_count as usize;
        let positions = 0..vc * mem::size_of::<VertexPosition>();
        let normals = positions.end..positions.end + vc * mem::size_of::<VertexNormals>();
        let texture_coordinates =
            normals.end..normals.end + vc * mem::size_of::<VertexTextureCoordinate>();
        let color_size = if has_colors {
            vc * mem::size_of::<VertexColors>()
        } else {
            0
        };
        let colors = texture_coordinates.end..texture_coordinates.end + color_size;
        let indices = colors.end..colors.end + index_count as usize * mem::size_of::<Index>();
        Self {
            positions,
            normals,
            texture_coordinates,
            colors,
            indices,
        }
    }
}

fn is_half_exact(value: f32) -> bool {
    value.abs() <= f16::MAX.to_f32()
        && (f16::from_f32(value).to_f32() - value).abs() <= f32::EPSILON
}

fn read_f16(reader: &mut impl Read) -> io::Result<f32> {
    Ok(f16::from_bits(reader.read_u16::<LittleEndian>()?).to_f32())
}

fn read_vec3(reader: &mut impl Read) -> io::Result<glam::Vec3> {
    Ok(glam::Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

/// Packed vertex and index streams of a static mesh.
///
/// Storage is a single 4-byte aligned allocation. The vertex streams come
/// first (positions, normals, texture coordinates, colors) followed by the
/// 32-bit indices, so the vertex part can be uploaded as one range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticObject {
    flags: StaticObjectFlags,
    vertex_count: u32,
    index_count: u32,
    bounding_box: BoundingBox,
    data: Vec<u32>,
}

impl StaticObject {
    pub fn new(vertex_count: u32, index_count: u32, color_slots: ColorSlots) -> Self {
        let layout = Layout::new(vertex_count, index_count, color_slots.any());
        Self {
            flags: color_slots.flags(),
            vertex_count,
            index_count,
            bounding_box: BoundingBox::default(),
            data: vec![0; layout.indices.end / mem::size_of::<u32>()],
        }
    }

    /// Parse the encoded form. Incompatible or truncated data produce an
    /// empty object, check with [`Self::is_valid`].
    #[profiling::function]
    pub fn decode(bytes: &[u8]) -> Self {
        match Self::read(&mut io::Cursor::new(bytes)) {
            Ok(object) => object,
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!("Mesh data of {} bytes is truncated", bytes.len());
                Self::default()
            }
            Err(e) => {
                log::warn!("Unable to decode mesh: {}", e);
                Self::default()
            }
        }
    }

    fn read(cursor: &mut io::Cursor<&[u8]>) -> io::Result<Self> {
        let total = cursor.get_ref().len() as u64;
        let version = cursor.read_u16::<LittleEndian>()?;
        let flags = StaticObjectFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let vertex_count = cursor.read_u32::<LittleEndian>()?;
        let index_count = cursor.read_u32::<LittleEndian>()?;
        let color_slots = ColorSlots::from_flags(flags);

        if version > LAST_COMPATIBLE_VERSION {
            log::warn!(
                "Mesh version {} is incompatible with the importer, try re-exporting",
                version
            );
            return Ok(Self::default());
        }
        if vertex_count == 0 || index_count == 0 {
            log::warn!(
                "Mesh has {} vertices and {} indices",
                vertex_count,
                index_count
            );
            return Ok(Self::default());
        }
        // reject before allocating storage for a bogus header
        let required = Self::encoded_size(flags, vertex_count, index_count);
        if total < required {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let mut object = Self::new(vertex_count, index_count, color_slots);
        let half_positions = flags.contains(StaticObjectFlags::HALF_POSITIONS);
        for position in object.positions_mut() {
            for x in position.iter_mut() {
                *x = if half_positions {
                    read_f16(cursor)?
                } else {
                    cursor.read_f32::<LittleEndian>()?
                };
            }
        }
        for normals in object.normals_mut() {
            cursor.read_f32_into::<LittleEndian>(&mut normals.normal)?;
            cursor.read_f32_into::<LittleEndian>(&mut normals.tangent)?;
        }
        let half_uvs = flags.contains(StaticObjectFlags::HALF_TEXTURE_COORDINATES);
        for uv in object.texture_coordinates_mut() {
            for x in uv.iter_mut() {
                *x = if half_uvs {
                    read_f16(cursor)?
                } else {
                    cursor.read_f32::<LittleEndian>()?
                };
            }
        }
        for slot in 0..COLOR_SLOT_COUNT {
            if !color_slots.is_used(slot) {
                continue;
            }
            let channels = if color_slots.has_alpha(slot) { 4 } else { 3 };
            for colors in object.colors_mut() {
                cursor.read_exact(&mut colors[slot][..channels])?;
            }
        }
        for index in object.indices_mut() {
            *index = if flags.contains(StaticObjectFlags::UINT8_INDICES) {
                cursor.read_u8()? as u32
            } else if flags.contains(StaticObjectFlags::UINT16_INDICES) {
                cursor.read_u16::<LittleEndian>()? as u32
            } else {
                cursor.read_u32::<LittleEndian>()?
            };
        }
        object.bounding_box = BoundingBox {
            min: read_vec3(cursor)?,
            max: read_vec3(cursor)?,
        };
        Ok(object)
    }

    fn encoded_size(flags: StaticObjectFlags, vertex_count: u32, index_count: u32) -> u64 {
        let vc = vertex_count as u64;
        let color_slots = ColorSlots::from_flags(flags);
        let position_size = if flags.contains(StaticObjectFlags::HALF_POSITIONS) {
            6
        } else {
            12
        };
        let uv_size = if flags.contains(StaticObjectFlags::HALF_TEXTURE_COORDINATES) {
            4
        } else {
            8
        };
        let color_size = (0..COLOR_SLOT_COUNT)
            .filter(|&slot| color_slots.is_used(slot))
            .map(|slot| if color_slots.has_alpha(slot) { 4 } else { 3 })
            .sum::<u64>();
        let index_size = if flags.contains(StaticObjectFlags::UINT8_INDICES) {
            1
        } else if flags.contains(StaticObjectFlags::UINT16_INDICES) {
            2
        } else {
            4
        };
        HEADER_SIZE
            + vc * (position_size + mem::size_of::<VertexNormals>() as u64 + uv_size + color_size)
            + index_count as u64 * index_size
            + BOUNDS_SIZE
    }

    /// Flags that [`Self::encode`] would write, with the narrowest lossless
    /// representation of every stream.
    pub fn compressed_flags(&self) -> StaticObjectFlags {
        let max_index = self
            .indices()
            .iter()
            .copied()
            .fold(self.vertex_count.saturating_sub(1), u32::max);
        let mut flags = self.flags & StaticObjectFlags::COLOR_SLOTS;
        if max_index <= u8::MAX as u32 {
            flags |= StaticObjectFlags::UINT8_INDICES;
        } else if max_index <= u16::MAX as u32 {
            flags |= StaticObjectFlags::UINT16_INDICES;
        }
        if self.positions().iter().flatten().all(|&x| is_half_exact(x)) {
            flags |= StaticObjectFlags::HALF_POSITIONS;
        }
        if self
            .texture_coordinates()
            .iter()
            .flatten()
            .all(|&x| is_half_exact(x))
        {
            flags |= StaticObjectFlags::HALF_TEXTURE_COORDINATES;
        }
        flags
    }

    #[profiling::function]
    pub fn encode(&self) -> Vec<u8> {
        let flags = self.compressed_flags();
        let mut out = Vec::with_capacity(
            Self::encoded_size(flags, self.vertex_count, self.index_count) as usize,
        );
        if let Err(e) = self.write(flags, &mut out) {
            log::error!("Unable to encode mesh: {}", e);
        }
        out
    }

    /// Write the encoded form, see [`Self::encode`].
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        self.write(self.compressed_flags(), writer)
    }

    fn write(&self, flags: StaticObjectFlags, writer: &mut impl Write) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(VERSION)?;
        writer.write_u16::<LittleEndian>(flags.bits())?;
        writer.write_u32::<LittleEndian>(self.vertex_count)?;
        writer.write_u32::<LittleEndian>(self.index_count)?;

        let half_positions = flags.contains(StaticObjectFlags::HALF_POSITIONS);
        for &x in self.positions().iter().flatten() {
            if half_positions {
                writer.write_u16::<LittleEndian>(f16::from_f32(x).to_bits())?;
            } else {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        for normals in self.normals() {
            for &x in normals.normal.iter().chain(normals.tangent.iter()) {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        let half_uvs = flags.contains(StaticObjectFlags::HALF_TEXTURE_COORDINATES);
        for &x in self.texture_coordinates().iter().flatten() {
            if half_uvs {
                writer.write_u16::<LittleEndian>(f16::from_f32(x).to_bits())?;
            } else {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        let color_slots = self.color_slots();
        for slot in 0..COLOR_SLOT_COUNT {
            if !color_slots.is_used(slot) {
                continue;
            }
            let channels = if color_slots.has_alpha(slot) { 4 } else { 3 };
            for colors in self.colors() {
                writer.write_all(&colors[slot][..channels])?;
            }
        }
        for &index in self.indices() {
            if flags.contains(StaticObjectFlags::UINT8_INDICES) {
                writer.write_u8(index as u8)?;
            } else if flags.contains(StaticObjectFlags::UINT16_INDICES) {
                writer.write_u16::<LittleEndian>(index as u16)?;
            } else {
                writer.write_u32::<LittleEndian>(index)?;
            }
        }
        for v in [self.bounding_box.min, self.bounding_box.max] {
            for x in v.to_array() {
                writer.write_f32::<LittleEndian>(x)?;
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.vertex_count != 0 && self.index_count != 0
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn color_slots(&self) -> ColorSlots {
        ColorSlots::from_flags(self.flags)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn set_bounding_box(&mut self, bounding_box: BoundingBox) {
        self.bounding_box = bounding_box;
    }

    fn layout(&self) -> Layout {
        Layout::new(self.vertex_count, self.index_count, self.color_slots().any())
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn positions(&self) -> &[VertexPosition] {
        bytemuck::cast_slice(&self.bytes()[self.layout().positions])
    }
    pub fn positions_mut(&mut self) -> &mut [VertexPosition] {
        let range = self.layout().positions;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    pub fn normals(&self) -> &[VertexNormals] {
        bytemuck::cast_slice(&self.bytes()[self.layout().normals])
    }
    pub fn normals_mut(&mut self) -> &mut [VertexNormals] {
        let range = self.layout().normals;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    pub fn texture_coordinates(&self) -> &[VertexTextureCoordinate] {
        bytemuck::cast_slice(&self.bytes()[self.layout().texture_coordinates])
    }
    pub fn texture_coordinates_mut(&mut self) -> &mut [VertexTextureCoordinate] {
        let range = self.layout().texture_coordinates;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    /// Empty unless at least one color slot is used.
    pub fn colors(&self) -> &[VertexColors] {
        bytemuck::cast_slice(&self.bytes()[self.layout().colors])
    }
    pub fn colors_mut(&mut self) -> &mut [VertexColors] {
        let range = self.layout().colors;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    pub fn indices(&self) -> &[Index] {
        bytemuck::cast_slice(&self.bytes()[self.layout().indices])
    }
    pub fn indices_mut(&mut self) -> &mut [Index] {
        let range = self.layout().indices;
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    /// All vertex streams as one contiguous range.
    pub fn vertex_data(&self) -> &[u8] {
        &self.bytes()[..self.layout().indices.start]
    }

    pub fn index_data(&self) -> &[u8] {
        &self.bytes()[self.layout().indices]
    }

    #[profiling::function]
    pub fn compute_bounding_box(&self) -> BoundingBox {
        const LANES: usize = 8;
        let positions = self.positions();
        if positions.is_empty() {
            return BoundingBox::default();
        }
        let mut min = [glam::Vec3::splat(f32::INFINITY); LANES];
        let mut max = [glam::Vec3::splat(f32::NEG_INFINITY); LANES];
        let batches = positions.chunks_exact(LANES);
        let tail = batches.remainder();
        for batch in batches {
            for (lane, &position) in batch.iter().enumerate() {
                let p = glam::Vec3::from(position);
                min[lane] = min[lane].min(p);
                max[lane] = max[lane].max(p);
            }
        }
        let mut bb_min = min.iter().fold(min[0], |a, &b| a.min(b));
        let mut bb_max = max.iter().fold(max[0], |a, &b| a.max(b));
        for &position in tail {
            let p = glam::Vec3::from(position);
            bb_min = bb_min.min(p);
            bb_max = bb_max.max(p);
        }
        BoundingBox {
            min: bb_min,
            max: bb_max,
        }
    }
}
