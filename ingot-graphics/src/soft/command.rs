use std::sync::atomic::Ordering;

impl super::Context {
    fn execute(
        &self,
        resources: &mut super::ResourceState,
        queues: &mut super::QueueState,
        queue: crate::QueueFamily,
        command: &crate::Command,
    ) -> Result<(), crate::DeviceError> {
        match *command {
            crate::Command::CopyBufferToBuffer { src, dst, size } => {
                resources.copy(src, dst, size)
            }
            crate::Command::Barrier(ref barrier) => {
                let _ = resources.range(barrier.piece, barrier.size)?;
                let (src_family, dst_family) = match barrier.queue_transfer {
                    Some(families) => families,
                    None => return Ok(()),
                };
                let buffer = barrier.piece.buffer;
                if barrier.is_release() {
                    if src_family != queue {
                        return Err(crate::DeviceError::OwnershipViolation(buffer));
                    }
                    queues
                        .pending_releases
                        .insert((barrier.piece, dst_family));
                } else if barrier.is_acquire() {
                    if dst_family != queue
                        || !queues
                            .pending_releases
                            .remove(&(barrier.piece, dst_family))
                    {
                        return Err(crate::DeviceError::OwnershipViolation(buffer));
                    }
                } else {
                    // a queue transfer has to be split into release and acquire
                    return Err(crate::DeviceError::OwnershipViolation(buffer));
                }
                Ok(())
            }
        }
    }
}

impl crate::CommandDevice for super::Context {
    fn is_unified(&self) -> bool {
        self.desc.unified_queues
    }

    fn create_command_encoder(&self, desc: crate::CommandEncoderDesc) -> crate::CommandEncoder {
        self.live_encoders.fetch_add(1, Ordering::AcqRel);
        crate::CommandEncoder::new(desc)
    }

    fn destroy_command_encoder(&self, encoder: crate::CommandEncoder) {
        log::trace!("Destroying encoder '{}'", encoder.name());
        self.live_encoders.fetch_sub(1, Ordering::AcqRel);
    }

    fn submit(
        &self,
        encoder: &mut crate::CommandEncoder,
        desc: crate::SubmitDesc,
    ) -> Result<crate::SyncPoint, crate::DeviceError> {
        profiling::scope!("Soft submit");
        self.check_alive()?;
        let queue = encoder.queue();
        if self.desc.unified_queues && queue == crate::QueueFamily::Transfer {
            return Err(crate::DeviceError::InvalidEncoder(encoder.name().to_string()));
        }
        let commands = encoder.take_commands()?;

        let sync_point = {
            let mut queues = self.queues.lock();
            {
                let mut resources = self.resources.lock();
                for command in commands.iter() {
                    self.execute(&mut resources, &mut queues, queue, command)?;
                }
            }
            let value = queues.value_mut(queue);
            *value += 1;
            let sync_point = crate::SyncPoint {
                queue,
                value: *value,
            };
            queues.submission_count += 1;
            if self.record {
                queues.submissions.push(super::Submission {
                    encoder: encoder.name().to_string(),
                    queue,
                    wait: desc.wait,
                    sync_point,
                    commands,
                });
            }
            sync_point
        };

        if let Some(on_complete) = desc.on_complete {
            on_complete();
        }
        Ok(sync_point)
    }

    fn wait_for(&self, sp: &crate::SyncPoint, _timeout_ms: u32) -> bool {
        *self.queues.lock().value_mut(sp.queue) >= sp.value
    }
}
