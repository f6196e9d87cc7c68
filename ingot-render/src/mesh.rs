use crate::static_object::{ColorSlots, StaticObject};
use ingot_graphics::{self as gpu, CommandDevice as _, ResourceDevice as _};
use std::mem;

/// GPU vertex and index buffers of a mesh on one device.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct RenderMesh {
    pub vertex_buffer: Option<gpu::Buffer>,
    pub index_buffer: Option<gpu::Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl RenderMesh {
    pub const INVALID: Self = Self {
        vertex_buffer: None,
        index_buffer: None,
        vertex_count: 0,
        index_count: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.vertex_buffer.is_some() && self.index_buffer.is_some()
    }

    /// Allocate device buffers and record the upload of `vertex_data` and
    /// `indices` into `encoders`, which have to be recording.
    ///
    /// Returns the staging buffer, which must outlive the submission.
    /// On allocation failure the mesh is invalid and nothing is recorded.
    #[profiling::function]
    pub fn new(
        device: &dyn gpu::Device,
        encoders: &mut gpu::EncoderPair,
        vertex_count: u32,
        vertex_data: &[u8],
        indices: &[u32],
    ) -> (Self, Option<gpu::Buffer>) {
        let vertex_size = vertex_data.len() as u64;
        let index_data: &[u8] = bytemuck::cast_slice(indices);
        let index_size = index_data.len() as u64;

        let vertex_buffer = device.create_buffer(gpu::BufferDesc {
            name: "mesh vertices",
            size: vertex_size,
            memory: gpu::Memory::Device,
            usage: gpu::BufferUsage::VERTEX
                | gpu::BufferUsage::STORAGE
                | gpu::BufferUsage::TRANSFER_DST
                | gpu::BufferUsage::DEVICE_ADDRESS,
        });
        let index_buffer = device.create_buffer(gpu::BufferDesc {
            name: "mesh indices",
            size: index_size,
            memory: gpu::Memory::Device,
            usage: gpu::BufferUsage::INDEX
                | gpu::BufferUsage::STORAGE
                | gpu::BufferUsage::TRANSFER_DST
                | gpu::BufferUsage::DEVICE_ADDRESS,
        });
        let (vertex_buffer, index_buffer) = match (vertex_buffer, index_buffer) {
            (Ok(vb), Ok(ib)) => (vb, ib),
            (vb, ib) => {
                for result in [vb, ib] {
                    match result {
                        Ok(buffer) => device.destroy_buffer(buffer),
                        Err(e) => log::warn!("Unable to allocate mesh buffers: {}", e),
                    }
                }
                return (Self::INVALID, None);
            }
        };

        let staging = match device.create_buffer(gpu::BufferDesc {
            name: "mesh staging",
            size: vertex_size + index_size,
            memory: gpu::Memory::Upload,
            usage: gpu::BufferUsage::TRANSFER_SRC,
        }) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Unable to allocate mesh staging: {}", e);
                device.destroy_buffer(vertex_buffer);
                device.destroy_buffer(index_buffer);
                return (Self::INVALID, None);
            }
        };
        if let Err(e) = device
            .write_buffer(staging.into(), vertex_data)
            .and_then(|()| device.write_buffer(staging.at(vertex_size), index_data))
        {
            log::warn!("Unable to fill mesh staging: {}", e);
            for buffer in [vertex_buffer, index_buffer, staging] {
                device.destroy_buffer(buffer);
            }
            return (Self::INVALID, None);
        }

        {
            let mut pass = encoders.transfer.transfer();
            pass.copy_buffer_to_buffer(staging.into(), vertex_buffer.into(), vertex_size);
            pass.copy_buffer_to_buffer(staging.at(vertex_size), index_buffer.into(), index_size);
        }
        let after = gpu::AccessFlags::VERTEX_READ | gpu::AccessFlags::INDEX_READ;
        encoders.transfer_ownership(
            vertex_buffer.into(),
            vertex_size,
            gpu::AccessFlags::TRANSFER_WRITE,
            after,
        );
        encoders.transfer_ownership(
            index_buffer.into(),
            index_size,
            gpu::AccessFlags::TRANSFER_WRITE,
            after,
        );

        let mesh = Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            vertex_count,
            index_count: indices.len() as u32,
        };
        (mesh, Some(staging))
    }

    pub fn from_object(
        device: &dyn gpu::Device,
        encoders: &mut gpu::EncoderPair,
        object: &StaticObject,
    ) -> (Self, Option<gpu::Buffer>) {
        Self::new(
            device,
            encoders,
            object.vertex_count(),
            object.vertex_data(),
            object.indices(),
        )
    }

    /// Placeholder quad shown while the real mesh is loading.
    pub fn dummy(
        device: &dyn gpu::Device,
        encoders: &mut gpu::EncoderPair,
    ) -> (Self, Option<gpu::Buffer>) {
        Self::from_object(device, encoders, &dummy_object())
    }

    pub fn destroy(self, device: &dyn gpu::Device) {
        if let Some(buffer) = self.vertex_buffer {
            device.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.index_buffer {
            device.destroy_buffer(buffer);
        }
    }
}

/// Unit quad in the XY plane facing +Z.
pub fn dummy_object() -> StaticObject {
    let mut object = StaticObject::new(4, 6, ColorSlots::NONE);
    object.positions_mut().copy_from_slice(&[
        [-0.5, -0.5, 0.0],
        [0.5, -0.5, 0.0],
        [0.5, 0.5, 0.0],
        [-0.5, 0.5, 0.0],
    ]);
    for normals in object.normals_mut() {
        normals.normal = [0.0, 0.0, 1.0];
        normals.tangent = [1.0, 0.0, 0.0, 1.0];
    }
    object
        .texture_coordinates_mut()
        .copy_from_slice(&[[1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
    object.indices_mut().copy_from_slice(&[0, 1, 2, 2, 3, 0]);
    let bounding_box = object.compute_bounding_box();
    object.set_bounding_box(bounding_box);
    object
}

/// Submit recorded upload encoders. With separate queues the graphics
/// side waits for the transfer side, and `on_complete` follows the last one.
pub fn submit_upload(
    device: &dyn gpu::Device,
    encoders: &mut gpu::EncoderPair,
    on_complete: Option<gpu::CompletionCallback>,
) -> Result<gpu::SyncPoint, gpu::DeviceError> {
    match encoders.graphics {
        None => device.submit(
            &mut encoders.transfer,
            gpu::SubmitDesc {
                wait: None,
                on_complete,
            },
        ),
        Some(ref mut graphics) => {
            let transfer_point = device.submit(&mut encoders.transfer, gpu::SubmitDesc::default())?;
            device.submit(
                graphics,
                gpu::SubmitDesc {
                    wait: Some(transfer_point),
                    on_complete,
                },
            )
        }
    }
}

/// Device addresses of the mesh streams, laid out for shader access.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshAddresses {
    pub normals: u64,
    pub texture_coordinates: u64,
    pub indices: u64,
    pub pad: u64,
}

impl MeshAddresses {
    pub const SIZE: u64 = mem::size_of::<Self>() as u64;

    pub fn new(device: &dyn gpu::Device, mesh: &RenderMesh) -> Result<Self, gpu::DeviceError> {
        let (vertex_buffer, index_buffer) = match (mesh.vertex_buffer, mesh.index_buffer) {
            (Some(vb), Some(ib)) => (vb, ib),
            _ => return Ok(Self::default()),
        };
        let vc = mesh.vertex_count as u64;
        let normals = device.buffer_device_address(vertex_buffer)?
            + crate::util::align_to(vc * mem::size_of::<[f32; 3]>() as u64, 4);
        Ok(Self {
            normals,
            texture_coordinates: normals
                + vc * mem::size_of::<crate::static_object::VertexNormals>() as u64,
            indices: device.buffer_device_address(index_buffer)?,
            pad: 0,
        })
    }
}
