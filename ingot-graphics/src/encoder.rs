use super::{
    AccessFlags, BufferBarrier, BufferPiece, CommandEncoderDesc, DeviceError, PipelineStages,
    QueueFamily,
};
use std::mem;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CopyBufferToBuffer {
        src: BufferPiece,
        dst: BufferPiece,
        size: u64,
    },
    Barrier(BufferBarrier),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncoderState {
    Initial,
    Recording,
    Finished,
}

/// Backend-independent list of recorded commands for one queue.
#[derive(Debug)]
pub struct CommandEncoder {
    name: String,
    queue: QueueFamily,
    commands: Vec<Command>,
    state: EncoderState,
}

impl CommandEncoder {
    pub fn new(desc: CommandEncoderDesc) -> Self {
        Self {
            name: desc.name.to_string(),
            queue: desc.queue,
            commands: Vec::new(),
            state: EncoderState::Initial,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> QueueFamily {
        self.queue
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn start(&mut self) {
        self.commands.clear();
        self.state = EncoderState::Recording;
    }

    pub fn transfer(&mut self) -> TransferCommandEncoder {
        assert_eq!(
            self.state,
            EncoderState::Recording,
            "Encoder '{}' is not recording",
            self.name
        );
        TransferCommandEncoder {
            commands: &mut self.commands,
        }
    }

    pub fn finish(&mut self) {
        assert_eq!(self.state, EncoderState::Recording);
        self.state = EncoderState::Finished;
    }

    /// Take the recorded commands out for execution.
    pub fn take_commands(&mut self) -> Result<Vec<Command>, DeviceError> {
        if self.state != EncoderState::Finished {
            return Err(DeviceError::EncoderNotFinished(self.name.clone()));
        }
        self.state = EncoderState::Initial;
        Ok(mem::take(&mut self.commands))
    }

    fn push_barrier(&mut self, barrier: BufferBarrier) {
        assert_eq!(self.state, EncoderState::Recording);
        self.commands.push(Command::Barrier(barrier));
    }
}

pub struct TransferCommandEncoder<'a> {
    commands: &'a mut Vec<Command>,
}

impl TransferCommandEncoder<'_> {
    pub fn copy_buffer_to_buffer(&mut self, src: BufferPiece, dst: BufferPiece, size: u64) {
        self.commands
            .push(Command::CopyBufferToBuffer { src, dst, size });
    }

    /// Memory barrier within the encoder's own queue.
    pub fn buffer_barrier(
        &mut self,
        piece: BufferPiece,
        size: u64,
        access: (AccessFlags, AccessFlags),
        stages: (PipelineStages, PipelineStages),
    ) {
        self.commands.push(Command::Barrier(BufferBarrier {
            piece,
            size,
            access_before: access.0,
            access_after: access.1,
            stages_before: stages.0,
            stages_after: stages.1,
            queue_transfer: None,
        }));
    }
}

/// Transfer encoder with an optional graphics encoder, present when
/// the device runs transfers on a separate queue family.
pub struct EncoderPair {
    pub transfer: CommandEncoder,
    pub graphics: Option<CommandEncoder>,
}

impl EncoderPair {
    pub fn new(transfer: CommandEncoder, graphics: Option<CommandEncoder>) -> Self {
        if let Some(ref graphics) = graphics {
            assert_eq!(transfer.queue(), QueueFamily::Transfer);
            assert_eq!(graphics.queue(), QueueFamily::Graphics);
        }
        Self { transfer, graphics }
    }

    pub fn is_unified(&self) -> bool {
        self.graphics.is_none()
    }

    pub fn start(&mut self) {
        self.transfer.start();
        if let Some(ref mut graphics) = self.graphics {
            graphics.start();
        }
    }

    pub fn finish(&mut self) {
        self.transfer.finish();
        if let Some(ref mut graphics) = self.graphics {
            graphics.finish();
        }
    }

    /// Make the results of transfer writes visible to vertex input.
    ///
    /// With separate queues this records the release barrier on the transfer
    /// encoder and the matching acquire barrier on the graphics encoder.
    pub fn transfer_ownership(
        &mut self,
        piece: BufferPiece,
        size: u64,
        access_before: AccessFlags,
        access_after: AccessFlags,
    ) {
        match self.graphics {
            None => self.transfer.push_barrier(BufferBarrier {
                piece,
                size,
                access_before,
                access_after,
                stages_before: PipelineStages::TRANSFER,
                stages_after: PipelineStages::VERTEX_INPUT,
                queue_transfer: None,
            }),
            Some(ref mut graphics) => {
                let families = Some((QueueFamily::Transfer, QueueFamily::Graphics));
                self.transfer.push_barrier(BufferBarrier {
                    piece,
                    size,
                    access_before,
                    access_after: AccessFlags::empty(),
                    stages_before: PipelineStages::TRANSFER,
                    stages_after: PipelineStages::BOTTOM_OF_PIPE,
                    queue_transfer: families,
                });
                graphics.push_barrier(BufferBarrier {
                    piece,
                    size,
                    access_before: AccessFlags::empty(),
                    access_after,
                    stages_before: PipelineStages::TOP_OF_PIPE,
                    stages_after: PipelineStages::VERTEX_INPUT,
                    queue_transfer: families,
                });
            }
        }
    }

    pub fn into_encoders(self) -> (CommandEncoder, Option<CommandEncoder>) {
        (self.transfer, self.graphics)
    }
}
