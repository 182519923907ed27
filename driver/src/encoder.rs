//! # Command Encoder
//!
//! Turns a [`ScsiRequest`] into the 50-byte CCB image plus its
//! scatter/gather descriptor list. Encoding is pure: the image is built in
//! memory, every size and address check happens before any byte reaches
//! the DMA window, and the firmware registers are never touched.
//!
//! A transfer that resolves to a single physical run is always sent with a
//! direct data pointer and the initiator opcode, never as a one-element
//! list. Single-element lists trip a firmware over/underrun defect.

use crate::error::EncodeError;
use crate::request::{Direction, ScsiRequest};
use aha154x_hal::command::{CcbOpcode, NO_AUTO_SENSE, TARGET_STATUS_PENDING};
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::layout::{ccb, control, MAX_SG_DESCRIPTORS, SG_DESCRIPTOR_SIZE};
use aha154x_hal::{PhysAddr, U24};

/// Opcode pair in use on an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcbEncoding {
    /// Opcodes that report residual byte counts
    Residual,
    /// Original opcodes without residuals
    Legacy,
}

impl CcbEncoding {
    /// Direct-pointer opcode
    pub const fn initiator(self) -> CcbOpcode {
        match self {
            CcbEncoding::Residual => CcbOpcode::Initiator,
            CcbEncoding::Legacy => CcbOpcode::LegacyInitiator,
        }
    }

    /// Descriptor-list opcode
    pub const fn scatter_gather(self) -> CcbOpcode {
        match self {
            CcbEncoding::Residual => CcbOpcode::ScatterGather,
            CcbEncoding::Legacy => CcbOpcode::LegacyScatterGather,
        }
    }
}

/// One scatter/gather descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgDescriptor {
    /// Bytes
    pub len: U24,
    /// Physical start
    pub addr: U24,
}

/// Descriptor list for one CCB
pub type SgList = heapless::Vec<SgDescriptor, MAX_SG_DESCRIPTORS>;

/// Encoded CCB ready to be copied into its slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcbImage {
    /// Hardware-visible bytes
    pub bytes: [u8; ccb::SIZE],
    /// Descriptor list, empty unless the opcode is a scatter/gather one
    pub sg: SgList,
}

impl CcbImage {
    /// Operation code
    pub fn opcode(&self) -> Option<CcbOpcode> {
        CcbOpcode::from_u8(self.bytes[ccb::OPCODE])
    }

    /// Data-length field
    pub fn data_length(&self) -> u32 {
        U24::from_be_bytes([
            self.bytes[ccb::DATA_LENGTH],
            self.bytes[ccb::DATA_LENGTH + 1],
            self.bytes[ccb::DATA_LENGTH + 2],
        ])
        .get()
    }

    /// Data-pointer field
    pub fn data_pointer(&self) -> u32 {
        U24::from_be_bytes([
            self.bytes[ccb::DATA_POINTER],
            self.bytes[ccb::DATA_POINTER + 1],
            self.bytes[ccb::DATA_POINTER + 2],
        ])
        .get()
    }

    /// Copy the image into the slot at `ccb_offset`, list at `sg_offset`
    pub fn write_to<M: DmaWindow>(&self, dma: &mut M, ccb_offset: usize, sg_offset: usize) {
        for (i, desc) in self.sg.iter().enumerate() {
            let at = sg_offset + i * SG_DESCRIPTOR_SIZE;
            dma.write(at, &desc.len.to_be_bytes());
            dma.write(at + 3, &desc.addr.to_be_bytes());
        }
        dma.write(ccb_offset, &self.bytes);
    }
}

/// Builds CCBs for one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEncoder {
    /// Active opcode pair
    pub encoding: CcbEncoding,
    /// Whether multi-descriptor lists may be used
    pub scatter_gather: bool,
}

impl CommandEncoder {
    /// Descriptors a single CCB may carry
    pub const fn capacity(&self) -> usize {
        if self.scatter_gather {
            MAX_SG_DESCRIPTORS
        } else {
            1
        }
    }

    /// Walk the buffer runs into descriptors
    ///
    /// Each run is truncated to the bytes still to transfer. Fails before
    /// producing anything if the runs do not fit the descriptor capacity
    /// or do not cover the transfer.
    pub fn plan(&self, request: &ScsiRequest) -> Result<SgList, EncodeError> {
        let mut list = SgList::new();
        let total = request.transfer_length;
        if total as u64 > U24::MAX as u64 {
            return Err(EncodeError::TransferTooLarge);
        }
        let mut left = total;
        for run in request.segments.iter().filter(|run| run.len > 0) {
            if left == 0 {
                break;
            }
            if list.len() == self.capacity() {
                return Err(EncodeError::TransferTooLarge);
            }
            let len = run.len.min(left);
            let last = run.addr.add(len as u64 - 1);
            let addr = run.addr.to_u24().map_err(|_| EncodeError::AddressOutOfRange(run.addr.as_u64()))?;
            last.to_u24().map_err(|_| EncodeError::AddressOutOfRange(last.as_u64()))?;
            let len = U24::new(len as u64).map_err(|_| EncodeError::TransferTooLarge)?;
            list.push(SgDescriptor { len, addr }).map_err(|_| EncodeError::TransferTooLarge)?;
            left -= len.get();
        }
        if left != 0 {
            return Err(EncodeError::BufferTooShort);
        }
        Ok(list)
    }

    /// Encode `request`; `sg_list` is where the slot's descriptor list lives
    pub fn encode(&self, request: &ScsiRequest, sg_list: PhysAddr) -> Result<CcbImage, EncodeError> {
        let mut bytes = [0u8; ccb::SIZE];
        let address = request.address;
        let mut control_byte = (address.target << control::TARGET_SHIFT) | (address.lun & control::LUN_MASK);
        let direction = request.direction;
        if direction == Direction::OUT {
            control_byte |= control::DATA_OUT;
        } else if direction == Direction::IN {
            control_byte |= control::DATA_IN;
        }
        bytes[ccb::CONTROL] = control_byte;
        bytes[ccb::SENSE_LENGTH] = NO_AUTO_SENSE;
        bytes[ccb::CDB_LENGTH] = request.cdb.len() as u8;
        bytes[ccb::CDB..ccb::CDB + request.cdb.len()].copy_from_slice(&request.cdb);
        bytes[ccb::TARGET_STATUS] = TARGET_STATUS_PENDING;

        if !request.has_data() {
            bytes[ccb::OPCODE] = self.encoding.initiator() as u8;
            return Ok(CcbImage { bytes, sg: SgList::new() });
        }

        let mut sg = self.plan(request)?;
        let (opcode, length, pointer) = if sg.len() == 1 {
            let run = sg[0];
            sg.clear();
            (self.encoding.initiator(), run.len, run.addr)
        } else {
            let list_bytes = U24::new((sg.len() * SG_DESCRIPTOR_SIZE) as u64)
                .map_err(|_| EncodeError::TransferTooLarge)?;
            let list_addr = sg_list
                .to_u24()
                .map_err(|_| EncodeError::AddressOutOfRange(sg_list.as_u64()))?;
            (self.encoding.scatter_gather(), list_bytes, list_addr)
        };
        bytes[ccb::OPCODE] = opcode as u8;
        length.write_to(&mut bytes, ccb::DATA_LENGTH);
        pointer.write_to(&mut bytes, ccb::DATA_POINTER);
        log::trace!(
            "CCB {:?} target {} lun {} len {} ({} descriptors)",
            opcode,
            address.target,
            address.lun,
            request.transfer_length,
            sg.len()
        );
        Ok(CcbImage { bytes, sg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{LunAddress, RequestTag, Segment};
    use aha154x_hal::dma::HeapDma;
    use aha154x_hal::layout;
    use alloc::vec;
    use alloc::vec::Vec;

    const SG_LIST: PhysAddr = PhysAddr::new(0x8078);

    fn encoder() -> CommandEncoder {
        CommandEncoder { encoding: CcbEncoding::Residual, scatter_gather: true }
    }

    fn read10(direction: Direction, segments: Vec<Segment>, len: u32) -> ScsiRequest {
        ScsiRequest::new(RequestTag(1), LunAddress::new(3, 1), &[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0])
            .unwrap()
            .with_data(direction, segments, len)
    }

    #[test]
    fn test_no_data_uses_initiator_with_zero_pointer() {
        let req = ScsiRequest::new(RequestTag(1), LunAddress::new(2, 0), &[0; 6]).unwrap();
        let image = encoder().encode(&req, SG_LIST).unwrap();
        assert_eq!(image.opcode(), Some(CcbOpcode::Initiator));
        assert_eq!(image.bytes[ccb::CONTROL], 2 << 5);
        assert_eq!(image.data_length(), 0);
        assert_eq!(image.data_pointer(), 0);
        assert_eq!(image.bytes[ccb::SENSE_LENGTH], 1);
        assert_eq!(image.bytes[ccb::TARGET_STATUS], 0xFF);
        assert_eq!(image.bytes[ccb::CDB_LENGTH], 6);
    }

    #[test]
    fn test_single_run_collapses_to_direct_pointer() {
        let req = read10(Direction::IN, vec![Segment::new(0x2_0000, 4096)], 512);
        let image = encoder().encode(&req, SG_LIST).unwrap();
        assert!(image.sg.is_empty());
        assert_eq!(image.opcode(), Some(CcbOpcode::Initiator));
        assert_eq!(image.data_length(), 512);
        assert_eq!(image.data_pointer(), 0x2_0000);
        assert_eq!(image.bytes[ccb::CONTROL], (3 << 5) | 1 | 0x10);
    }

    #[test]
    fn test_single_run_uses_legacy_initiator_after_fallback() {
        let enc = CommandEncoder { encoding: CcbEncoding::Legacy, scatter_gather: true };
        let req = read10(Direction::OUT, vec![Segment::new(0x3000, 512)], 512);
        let image = enc.encode(&req, SG_LIST).unwrap();
        assert_eq!(image.opcode(), Some(CcbOpcode::LegacyInitiator));
        assert_eq!(image.bytes[ccb::CONTROL] & 0x18, 0x08);
    }

    #[test]
    fn test_multiple_runs_build_list() {
        let runs = vec![Segment::new(0x1_0000, 0x1000), Segment::new(0x3_0000, 0x1000), Segment::new(0x5_0000, 0x1000)];
        let req = read10(Direction::IN, runs, 0x2800);
        let image = encoder().encode(&req, SG_LIST).unwrap();
        assert_eq!(image.opcode(), Some(CcbOpcode::ScatterGather));
        assert_eq!(image.sg.len(), 3);
        assert_eq!(image.data_length(), 18);
        assert_eq!(image.data_pointer(), 0x8078);
        let sum: u32 = image.sg.iter().map(|d| d.len.get()).sum();
        assert_eq!(sum, 0x2800);
        assert_eq!(image.sg[2].len.get(), 0x800);
    }

    #[test]
    fn test_runs_past_transfer_are_ignored() {
        let runs = vec![Segment::new(0x1_0000, 0x200), Segment::new(0x3_0000, 0x1000)];
        let req = read10(Direction::IN, runs, 0x200);
        let image = encoder().encode(&req, SG_LIST).unwrap();
        assert!(image.sg.is_empty());
        assert_eq!(image.data_length(), 0x200);
    }

    #[test]
    fn test_both_direction_bits_leave_direction_to_target() {
        let req = read10(Direction::IN | Direction::OUT, vec![Segment::new(0x1000, 512)], 512);
        let image = encoder().encode(&req, SG_LIST).unwrap();
        assert_eq!(image.bytes[ccb::CONTROL] & 0x18, 0);
    }

    #[test]
    fn test_too_many_runs_rejected() {
        let runs: Vec<Segment> = (0..18).map(|i| Segment::new(0x1_0000 + i * 0x2000, 0x1000)).collect();
        let req = read10(Direction::IN, runs, 18 * 0x1000);
        assert_eq!(encoder().encode(&req, SG_LIST), Err(EncodeError::TransferTooLarge));

        let no_sg = CommandEncoder { encoding: CcbEncoding::Residual, scatter_gather: false };
        let req = read10(Direction::IN, vec![Segment::new(0x1000, 512), Segment::new(0x4000, 512)], 1024);
        assert_eq!(no_sg.plan(&req), Err(EncodeError::TransferTooLarge));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let req = read10(Direction::IN, vec![Segment::new(0x1000, 512)], 1024);
        assert_eq!(encoder().encode(&req, SG_LIST), Err(EncodeError::BufferTooShort));
    }

    #[test]
    fn test_addresses_above_16m_rejected() {
        let req = read10(Direction::IN, vec![Segment::new(0x0100_0000, 512)], 512);
        assert_eq!(
            encoder().encode(&req, SG_LIST),
            Err(EncodeError::AddressOutOfRange(0x0100_0000))
        );
        let req = read10(Direction::IN, vec![Segment::new(0x00FF_FF00, 0x200)], 0x200);
        assert_eq!(
            encoder().encode(&req, SG_LIST),
            Err(EncodeError::AddressOutOfRange(0x0100_00FF))
        );
    }

    #[test]
    fn test_write_to_window() {
        let mut dma = HeapDma::new(PhysAddr::new(0x8000), layout::WINDOW_SIZE);
        let runs = vec![Segment::new(0x1_0000, 0x100), Segment::new(0x2_0000, 0x100)];
        let req = read10(Direction::IN, runs, 0x200);
        let image = encoder().encode(&req, SG_LIST).unwrap();
        image.write_to(&mut dma, layout::slot(0), layout::slot_sg_list(0));
        let mut desc = [0u8; 12];
        dma.read(layout::slot_sg_list(0), &mut desc);
        assert_eq!(desc, [0, 1, 0, 0x01, 0, 0, 0, 1, 0, 0x02, 0, 0]);
        assert_eq!(dma.read_u8(layout::slot(0)), 0x04);
    }
}
