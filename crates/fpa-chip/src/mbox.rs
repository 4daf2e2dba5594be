//! Mailbox contract between the FPA VF and the PF.

/// Coprocessor tag for FPA messages.
pub const FPA_COPROC: u8 = 0x1;

/// FPA mailbox opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Query the hardware units assigned to this domain.
    Identify = 0x0,
    /// Configure (or, with a zeroed payload, disable) a pool.
    ConfigSet = 0x1,
    /// Read back a pool's configuration.
    ConfigGet = 0x2,
    /// Start aura buffer counting.
    StartCount = 0x3,
    /// Stop aura buffer counting.
    StopCount = 0x4,
    /// Bind an aura to its pool.
    AttachAura = 0x5,
    /// Unbind an aura from its pool.
    DetachAura = 0x6,
    /// Set the aura level.
    SetAuraLevel = 0x7,
    /// Read the aura level.
    GetAuraLevel = 0x8,
}

impl Opcode {
    /// Every opcode.
    pub const ALL: [Self; 9] = [
        Self::Identify,
        Self::ConfigSet,
        Self::ConfigGet,
        Self::StartCount,
        Self::StopCount,
        Self::AttachAura,
        Self::DetachAura,
        Self::SetAuraLevel,
        Self::GetAuraLevel,
    ];

    /// Decode a raw opcode byte.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x0 => Self::Identify,
            0x1 => Self::ConfigSet,
            0x2 => Self::ConfigGet,
            0x3 => Self::StartCount,
            0x4 => Self::StopCount,
            0x5 => Self::AttachAura,
            0x6 => Self::DetachAura,
            0x7 => Self::SetAuraLevel,
            0x8 => Self::GetAuraLevel,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Identify => "identify",
            Self::ConfigSet => "config-set",
            Self::ConfigGet => "config-get",
            Self::StartCount => "start-count",
            Self::StopCount => "stop-count",
            Self::AttachAura => "attach-aura",
            Self::DetachAura => "detach-aura",
            Self::SetAuraLevel => "set-aura-level",
            Self::GetAuraLevel => "get-aura-level",
        };
        f.write_str(name)
    }
}
