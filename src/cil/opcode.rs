//! CIL opcodes.

use std::fmt::Display;

macro_rules! opcodes {
    ($( $(#[$attr:meta])* $variant:ident = $mnemonic:literal, [$($byte:literal),+]; )*) => {
        /// A CIL opcode.
        ///
        /// Only the canonical (long-form) encodings are used; the short forms
        /// (`ldc.i4.s`, `br.s`, ...) exist purely as size optimizations.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        #[allow(missing_docs)]
        pub enum OpCode {
            $( $(#[$attr])* $variant, )*
        }

        impl OpCode {
            /// Every opcode, in mnemonic-table order.
            pub const ALL: &'static [OpCode] = &[$( Self::$variant, )*];

            /// The assembler mnemonic of the opcode.
            #[must_use]
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Self::$variant => $mnemonic, )*
                }
            }

            /// The byte encoding of the opcode.
            #[must_use]
            pub const fn encoding(self) -> &'static [u8] {
                match self {
                    $( Self::$variant => &[$($byte),+], )*
                }
            }
        }
    };
}

opcodes! {
    Nop = "nop", [0x00];
    LdNull = "ldnull", [0x14];
    LdcI4 = "ldc.i4", [0x20];
    LdcI8 = "ldc.i8", [0x21];
    LdcR4 = "ldc.r4", [0x22];
    LdcR8 = "ldc.r8", [0x23];
    Dup = "dup", [0x25];
    Pop = "pop", [0x26];
    Call = "call", [0x28];
    Calli = "calli", [0x29];
    Ret = "ret", [0x2A];
    Br = "br", [0x38];
    BrFalse = "brfalse", [0x39];
    BrTrue = "brtrue", [0x3A];
    Beq = "beq", [0x3B];
    Bge = "bge", [0x3C];
    Bgt = "bgt", [0x3D];
    Ble = "ble", [0x3E];
    Blt = "blt", [0x3F];
    BneUn = "bne.un", [0x40];
    Switch = "switch", [0x45];
    Add = "add", [0x58];
    Sub = "sub", [0x59];
    Mul = "mul", [0x5A];
    Div = "div", [0x5B];
    DivUn = "div.un", [0x5C];
    Rem = "rem", [0x5D];
    RemUn = "rem.un", [0x5E];
    And = "and", [0x5F];
    Or = "or", [0x60];
    Xor = "xor", [0x61];
    Shl = "shl", [0x62];
    Shr = "shr", [0x63];
    ShrUn = "shr.un", [0x64];
    Neg = "neg", [0x65];
    Not = "not", [0x66];
    ConvI1 = "conv.i1", [0x67];
    ConvI2 = "conv.i2", [0x68];
    ConvI4 = "conv.i4", [0x69];
    ConvI8 = "conv.i8", [0x6A];
    ConvR4 = "conv.r4", [0x6B];
    ConvR8 = "conv.r8", [0x6C];
    ConvU4 = "conv.u4", [0x6D];
    ConvU8 = "conv.u8", [0x6E];
    CallVirt = "callvirt", [0x6F];
    LdStr = "ldstr", [0x72];
    NewObj = "newobj", [0x73];
    CastClass = "castclass", [0x74];
    IsInst = "isinst", [0x75];
    Throw = "throw", [0x7A];
    LdFld = "ldfld", [0x7B];
    StFld = "stfld", [0x7D];
    LdsFld = "ldsfld", [0x7E];
    StsFld = "stsfld", [0x80];
    NewArr = "newarr", [0x8D];
    LdLen = "ldlen", [0x8E];
    LdElem = "ldelem", [0xA3];
    StElem = "stelem", [0xA4];
    ConvU2 = "conv.u2", [0xD1];
    ConvU1 = "conv.u1", [0xD2];
    ConvI = "conv.i", [0xD3];
    ConvU = "conv.u", [0xE0];
    EndFinally = "endfinally", [0xDC];
    Leave = "leave", [0xDD];
    Ceq = "ceq", [0xFE, 0x01];
    Cgt = "cgt", [0xFE, 0x02];
    CgtUn = "cgt.un", [0xFE, 0x03];
    Clt = "clt", [0xFE, 0x04];
    CltUn = "clt.un", [0xFE, 0x05];
    LdFtn = "ldftn", [0xFE, 0x06];
    LdArg = "ldarg", [0xFE, 0x09];
    LdArgA = "ldarga", [0xFE, 0x0A];
    StArg = "starg", [0xFE, 0x0B];
    LdLoc = "ldloc", [0xFE, 0x0C];
    LdLocA = "ldloca", [0xFE, 0x0D];
    StLoc = "stloc", [0xFE, 0x0E];
    Rethrow = "rethrow", [0xFE, 0x1A];
}

impl OpCode {
    /// Checks whether the opcode unconditionally transfers control, making
    /// the next instruction reachable only through a label mark or an
    /// exception-scope transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Br | Self::Leave | Self::Ret | Self::Throw | Self::Rethrow | Self::EndFinally
        )
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
