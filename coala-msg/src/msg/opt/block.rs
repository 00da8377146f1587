use super::OptValue;

/// Value of a Block1 or Block2 option.
///
/// Three items of information are packed in the option:
/// * the size of the block ([`Block::size`])
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of blocks with the given size.
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |  NUM  |M| SZX |
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

impl Block {
  /// Pack a block; `size` is clamped to `16..=1024` and rounded down to a power of two.
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    let num = num << 4;
    let more = u32::from(more) << 3;
    let size = size.max(16).min(1024);
    let szx = (15 - size.leading_zeros()) - 4;

    Self(num | more | szx)
  }

  /// Block size in bytes
  pub fn size(&self) -> u16 {
    let szx = (self.0 & 0b111).min(6);
    2u16.pow(szx + 4)
  }

  /// Whether more blocks follow this one
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) >> 3 == 1
  }

  /// Block number
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }

  /// Copy of this block with a different `more` flag
  pub fn with_more(&self, more: bool) -> Self {
    Self::new(self.size(), self.num(), more)
  }

  /// Interpret an option value as a block.
  ///
  /// `None` when the value has the reserved size exponent 7
  /// or does not fit in 3 bytes.
  pub fn from_value(v: &OptValue) -> Option<Self> {
    match v.as_uint() {
      | Some(n) if n <= 0xFF_FFFF && n & 0b111 != 7 => Some(Block(n as u32)),
      | _ => None,
    }
  }

  /// Encode as an option value
  pub fn to_value(&self) -> OptValue {
    OptValue::uint(u64::from(self.0))
  }
}

impl core::fmt::Display for Block {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}/{}/{}", self.num(), u8::from(self.more()), self.size())
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}

impl From<u32> for Block {
  fn from(n: u32) -> Self {
    Block(n)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn block() {
    let b = Block(33);
    assert_eq!(b.size(), 32);
    assert_eq!(b.num(), 2);
    assert_eq!(b.more(), false);

    let b = Block(59);
    assert_eq!(b.size(), 128);
    assert_eq!(b.num(), 3);
    assert_eq!(b.more(), true);

    assert_eq!(Block::new(32, 2, false), Block(33));
    assert_eq!(Block::new(128, 3, true), Block(59));
    assert_eq!(Block::new(1024, 5, true), Block(5 << 4 | 1 << 3 | 6));
  }

  #[test]
  fn size_rounds_down_to_nearest_power_of_two() {
    assert_eq!(Block::new(0, 1, false).size(), 16);
    assert_eq!(Block::new(17, 1, false).size(), 16);
    assert_eq!(Block::new(33, 1, false).size(), 32);
    assert_eq!(Block::new(1024, 1, false).size(), 1024);
    assert_eq!(Block::new(2048, 1, false).size(), 1024);
  }

  #[test]
  fn option_value() {
    let b = Block::new(1024, 300, true);
    assert_eq!(Block::from_value(&b.to_value()), Some(b));
    assert_eq!(Block::from_value(&OptValue::uint(0b0001_0111)), None);
    assert_eq!(Block::from_value(&OptValue::uint(0)), Some(Block::new(16, 0, false)));
    assert_eq!(b.to_string(), "300/1/1024");
  }
}
