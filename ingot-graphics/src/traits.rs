use super::{
    Buffer, BufferDesc, BufferPiece, CommandEncoder, CommandEncoderDesc, DeviceError,
    DeviceFeatures, DeviceId, SubmitDesc, SyncPoint,
};

pub trait ResourceDevice {
    fn create_buffer(&self, desc: BufferDesc) -> Result<Buffer, DeviceError>;
    /// Write host data into a host-visible buffer.
    fn write_buffer(&self, dst: BufferPiece, data: &[u8]) -> Result<(), DeviceError>;
    fn buffer_device_address(&self, buffer: Buffer) -> Result<u64, DeviceError>;
    fn destroy_buffer(&self, buffer: Buffer);
}

pub trait CommandDevice {
    /// Transfer and graphics work go to the same queue family.
    fn is_unified(&self) -> bool;
    fn create_command_encoder(&self, desc: CommandEncoderDesc) -> CommandEncoder;
    fn destroy_command_encoder(&self, encoder: CommandEncoder);
    /// Submit a finished encoder, leaving it ready to be started again.
    fn submit(
        &self,
        encoder: &mut CommandEncoder,
        desc: SubmitDesc,
    ) -> Result<SyncPoint, DeviceError>;
    fn wait_for(&self, sp: &SyncPoint, timeout_ms: u32) -> bool;
}

pub trait Device: ResourceDevice + CommandDevice + Send + Sync {
    fn id(&self) -> DeviceId;
    fn name(&self) -> &str;
    fn features(&self) -> DeviceFeatures;
}
