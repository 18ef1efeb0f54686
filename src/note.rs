//! Opt-in detection.
//!
//! A program asks for split stacks by carrying a note in one of its
//! `PT_NOTE` segments. We find the program headers through the auxiliary
//! vector and walk every note looking for ours. Anything missing or
//! malformed along the way just means "not requested".
use core::mem::size_of;

/// Vendor name, including its terminating NUL.
pub const NOTE_VENDOR: &[u8] = b"SafeStack\0";
/// The descriptor is a single 32-bit flag word.
pub const NOTE_DESC_SIZE: usize = 4;
pub const NOTE_TYPE: u32 = 0x5353_0001;

const NOTE_HEADER: usize = 12;

/// What the running image told us about itself.
#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub struct ImageInfo {
  /// The opt-in note was found.
  pub opted_in: bool,
  /// `PT_GNU_STACK` asks for executable stacks.
  pub executable_stack: bool,
}

/// The three auxiliary vector entries needed to find the program headers.
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct AuxInfo {
  pub phdr:  usize,
  pub phent: usize,
  pub phnum: usize,
}

impl AuxInfo {
  #[cfg(target_os="linux")]
  pub fn from_process() -> Option<AuxInfo> {
    let (phdr, phent, phnum) = unsafe {
      (libc::getauxval(libc::AT_PHDR), libc::getauxval(libc::AT_PHENT), libc::getauxval(libc::AT_PHNUM))
    };
    Some(AuxInfo { phdr: phdr as usize, phent: phent as usize, phnum: phnum as usize })
  }

  #[cfg(not(target_os="linux"))]
  pub fn from_process() -> Option<AuxInfo> { None }

  /// The header table is only trusted if its entries are the size we expect.
  pub fn is_valid(&self) -> bool {
    self.phdr != 0 && self.phnum != 0 && self.phent == size_of::<Phdr>()
  }
}

#[cfg(all(target_os="linux", target_pointer_width="64"))]
pub type Phdr = libc::Elf64_Phdr;
#[cfg(all(target_os="linux", target_pointer_width="32"))]
pub type Phdr = libc::Elf32_Phdr;

// Placeholder so `AuxInfo::is_valid` compiles; nothing can match it.
#[cfg(not(target_os="linux"))]
pub type Phdr = [u8; 0];

impl ImageInfo {
  /// Scans the program we are running in.
  pub fn from_process() -> ImageInfo {
    match AuxInfo::from_process() {
      Some(aux) => unsafe { scan(aux) },
      None => ImageInfo::default(),
    }
  }
}

/// Walks the program headers `aux` points at.
///
/// # Safety
///
/// When `aux` is valid, `phdr` must point at `phnum` readable program headers
/// whose `PT_NOTE` segments are mapped.
#[cfg(target_os="linux")]
pub unsafe fn scan(aux: AuxInfo) -> ImageInfo {
  use libc::{PF_X, PT_GNU_STACK, PT_NOTE, PT_PHDR};

  if !aux.is_valid() {
    return ImageInfo::default();
  }
  let phdrs = core::slice::from_raw_parts(aux.phdr as *const Phdr, aux.phnum);
  // Position independent images are loaded somewhere other than their link address.
  let bias = phdrs.iter()
    .find(|ph| ph.p_type == PT_PHDR)
    .map_or(0, |ph| aux.phdr.wrapping_sub(ph.p_vaddr as usize));

  // Without PT_GNU_STACK the kernel hands out executable stacks.
  let mut info = ImageInfo { opted_in: false, executable_stack: true };
  for ph in phdrs {
    match ph.p_type {
      PT_NOTE if ph.p_filesz != 0 => {
        let start = bias.wrapping_add(ph.p_vaddr as usize) as *const u8;
        let segment = core::slice::from_raw_parts(start, ph.p_filesz as usize);
        info.opted_in |= has_opt_in_note(segment);
      }
      PT_GNU_STACK => info.executable_stack = ph.p_flags & PF_X != 0,
      _ => {}
    }
  }
  info
}

#[cfg(not(target_os="linux"))]
pub unsafe fn scan(_aux: AuxInfo) -> ImageInfo { ImageInfo::default() }

/// Looks for the opt-in record among the notes of one segment.
pub fn has_opt_in_note(segment: &[u8]) -> bool {
  notes(segment).any(|note| {
    note.name == NOTE_VENDOR && note.desc.len() == NOTE_DESC_SIZE && note.kind == NOTE_TYPE
  })
}

/// One record of a note segment. `name` is unpadded.
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct Note<'a> {
  pub name: &'a [u8],
  pub desc: &'a [u8],
  pub kind: u32,
}

/// Iterates the records of a note segment, stopping at the first truncated one.
pub fn notes(segment: &[u8]) -> impl Iterator<Item = Note<'_>> {
  let mut rest = segment;
  core::iter::from_fn(move || {
    let (note, next) = parse_note(rest)?;
    rest = &rest[next.min(rest.len())..];
    Some(note)
  })
}

fn parse_note(bytes: &[u8]) -> Option<(Note<'_>, usize)> {
  let header = bytes.get(..NOTE_HEADER)?;
  let namesz = word(&header[0..4]) as usize;
  let descsz = word(&header[4..8]) as usize;
  let kind = word(&header[8..12]);
  let desc_start = NOTE_HEADER.checked_add(align4(namesz)?)?;
  let next = desc_start.checked_add(align4(descsz)?)?;
  let name = bytes.get(NOTE_HEADER..NOTE_HEADER + namesz)?;
  let desc = bytes.get(desc_start..desc_start.checked_add(descsz)?)?;
  Some((Note { name, desc, kind }, next))
}

fn word(bytes: &[u8]) -> u32 {
  u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn align4(n: usize) -> Option<usize> {
  Some(n.checked_add(3)? & !3)
}
