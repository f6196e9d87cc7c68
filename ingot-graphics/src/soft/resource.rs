use std::ops::Range;

const KEY_MASK: u64 = 0xFFFF_FFFF;

impl super::ResourceState {
    fn resolve(&self, buffer: crate::Buffer) -> Result<usize, crate::DeviceError> {
        let key = (buffer.raw() & KEY_MASK) as usize;
        match self.buffers.get(key) {
            Some(entry) if u64::from(entry.generation) == buffer.raw() >> 32 => Ok(key),
            _ => Err(crate::DeviceError::InvalidBuffer(buffer)),
        }
    }

    /// Resolve a piece of a buffer into a slab key and a byte range.
    pub(super) fn range(
        &self,
        piece: crate::BufferPiece,
        size: u64,
    ) -> Result<(usize, Range<usize>), crate::DeviceError> {
        let key = self.resolve(piece.buffer)?;
        let length = self.buffers[key].data.len() as u64;
        match piece.offset.checked_add(size) {
            Some(end) if end <= length => Ok((key, piece.offset as usize..end as usize)),
            _ => Err(crate::DeviceError::InvalidBuffer(piece.buffer)),
        }
    }

    pub(super) fn copy(
        &mut self,
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    ) -> Result<(), crate::DeviceError> {
        let (src_key, src_range) = self.range(src, size)?;
        let (dst_key, dst_range) = self.range(dst, size)?;
        if src_key == dst_key {
            self.buffers[src_key]
                .data
                .copy_within(src_range, dst_range.start);
        } else {
            let data = self.buffers[src_key].data[src_range].to_vec();
            self.buffers[dst_key].data[dst_range].copy_from_slice(&data);
        }
        Ok(())
    }
}

impl super::Context {
    /// Read back buffer contents, regardless of the memory type.
    pub fn read_buffer(
        &self,
        piece: crate::BufferPiece,
        size: u64,
    ) -> Result<Vec<u8>, crate::DeviceError> {
        let resources = self.resources.lock();
        let (key, range) = resources.range(piece, size)?;
        Ok(resources.buffers[key].data[range].to_vec())
    }
}

impl crate::ResourceDevice for super::Context {
    fn create_buffer(&self, desc: crate::BufferDesc) -> Result<crate::Buffer, crate::DeviceError> {
        self.check_alive()?;
        let mut resources = self.resources.lock();
        if let Some(budget) = self.desc.memory_budget {
            let available = budget.saturating_sub(resources.memory_used);
            if desc.size > available {
                log::debug!(
                    "Buffer '{}' of {} bytes exceeds the budget of '{}'",
                    desc.name,
                    desc.size,
                    self.desc.name
                );
                return Err(crate::DeviceError::OutOfMemory {
                    requested: desc.size,
                    available,
                });
            }
        }

        resources.generation = resources.generation.wrapping_add(1).max(1);
        let generation = resources.generation;
        let address = resources.next_address;
        let span = desc.size.max(1).div_ceil(super::ADDRESS_ALIGNMENT) * super::ADDRESS_ALIGNMENT;
        resources.next_address += span;
        resources.memory_used += desc.size;
        let key = resources.buffers.insert(super::BufferEntry {
            name: desc.name.to_string(),
            memory: desc.memory,
            generation,
            address,
            data: vec![0; desc.size as usize].into_boxed_slice(),
        });
        log::trace!("Created buffer '{}' at key {}", desc.name, key);
        Ok(crate::Buffer::from_raw(
            (u64::from(generation) << 32) | key as u64,
        ))
    }

    fn write_buffer(&self, dst: crate::BufferPiece, data: &[u8]) -> Result<(), crate::DeviceError> {
        self.check_alive()?;
        let mut resources = self.resources.lock();
        let (key, range) = resources.range(dst, data.len() as u64)?;
        let entry = &mut resources.buffers[key];
        if !entry.memory.is_host_visible() {
            return Err(crate::DeviceError::NotSupported(
                "writing to device-local memory",
            ));
        }
        entry.data[range].copy_from_slice(data);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: crate::Buffer) -> Result<u64, crate::DeviceError> {
        if !self
            .desc
            .features
            .contains(crate::DeviceFeatures::BUFFER_DEVICE_ADDRESS)
        {
            return Err(crate::DeviceError::NotSupported("buffer device address"));
        }
        let resources = self.resources.lock();
        let key = resources.resolve(buffer)?;
        Ok(resources.buffers[key].address)
    }

    fn destroy_buffer(&self, buffer: crate::Buffer) {
        let mut resources = self.resources.lock();
        match resources.resolve(buffer) {
            Ok(key) => {
                let entry = resources.buffers.remove(key);
                resources.memory_used -= entry.data.len() as u64;
                log::trace!("Destroyed buffer '{}'", entry.name);
            }
            Err(e) => log::error!("Unable to destroy: {}", e),
        }
    }
}
