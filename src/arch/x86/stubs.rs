//! Raw trap entry points.
//!
//! Every IDT gate points at one of the 256 stubs generated here instead of
//! directly at a Rust function: the CPU's `iret` frame (and, for faulting
//! exceptions, an error code) needs to be normalized into a single
//! [`crate::irq::Frame`] layout before Rust code can look at it, and that
//! normalization has to run with the stack still in the shape the CPU left
//! it, which is inherently a job for assembly.
//!
//! Exceptions 8, 10-14, 17, 21, 29, 30 push a hardware error code; every
//! other vector gets a synthetic zero pushed in its place so every stub
//! leaves the stack in the same shape for [`crate::irq::irq_common_handler`].
//! The 224 stubs from vector 32 onward (remapped IRQs and everything above
//! them, including the 0x80 syscall gate) are emitted by a GAS `.rept`
//! loop rather than written out by hand.

core::arch::global_asm!(
    r#"
.section .text
.code32

.macro isr_noerr num
.global isr_stub_\num
isr_stub_\num:
    push 0
    push \num
    jmp isr_common_stub
.endm

.macro isr_err num
.global isr_stub_\num
isr_stub_\num:
    push \num
    jmp isr_common_stub
.endm

isr_noerr 0
isr_noerr 1
isr_noerr 2
isr_noerr 3
isr_noerr 4
isr_noerr 5
isr_noerr 6
isr_noerr 7
isr_err   8
isr_noerr 9
isr_err   10
isr_err   11
isr_err   12
isr_err   13
isr_err   14
isr_noerr 15
isr_noerr 16
isr_err   17
isr_noerr 18
isr_noerr 19
isr_noerr 20
isr_err   21
isr_noerr 22
isr_noerr 23
isr_noerr 24
isr_noerr 25
isr_noerr 26
isr_noerr 27
isr_noerr 28
isr_err   29
isr_err   30
isr_noerr 31

.altmacro
.set vec, 32
.rept 224
    isr_noerr %vec
.set vec, vec+1
.endr

isr_common_stub:
    push gs
    push fs
    push es
    push ds

    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    pusha

    push esp
    call irq_common_handler
    add esp, 4

    popa

    pop ds
    pop es
    pop fs
    pop gs

    add esp, 8
    iret
"#
);

macro_rules! stub_externs_and_table {
    ($($n:literal => $name:ident),* $(,)?) => {
        unsafe extern "C" {
            $(fn $name();)*
        }

        /// Address of every generated stub, indexed by vector number.
        pub static STUB_TABLE: [unsafe extern "C" fn(); 256] = [
            $($name,)*
        ];
    };
}

stub_externs_and_table! {
    0 => isr_stub_0, 1 => isr_stub_1, 2 => isr_stub_2, 3 => isr_stub_3,
    4 => isr_stub_4, 5 => isr_stub_5, 6 => isr_stub_6, 7 => isr_stub_7,
    8 => isr_stub_8, 9 => isr_stub_9, 10 => isr_stub_10, 11 => isr_stub_11,
    12 => isr_stub_12, 13 => isr_stub_13, 14 => isr_stub_14, 15 => isr_stub_15,
    16 => isr_stub_16, 17 => isr_stub_17, 18 => isr_stub_18, 19 => isr_stub_19,
    20 => isr_stub_20, 21 => isr_stub_21, 22 => isr_stub_22, 23 => isr_stub_23,
    24 => isr_stub_24, 25 => isr_stub_25, 26 => isr_stub_26, 27 => isr_stub_27,
    28 => isr_stub_28, 29 => isr_stub_29, 30 => isr_stub_30, 31 => isr_stub_31,
    32 => isr_stub_32, 33 => isr_stub_33, 34 => isr_stub_34, 35 => isr_stub_35,
    36 => isr_stub_36, 37 => isr_stub_37, 38 => isr_stub_38, 39 => isr_stub_39,
    40 => isr_stub_40, 41 => isr_stub_41, 42 => isr_stub_42, 43 => isr_stub_43,
    44 => isr_stub_44, 45 => isr_stub_45, 46 => isr_stub_46, 47 => isr_stub_47,
    48 => isr_stub_48, 49 => isr_stub_49, 50 => isr_stub_50, 51 => isr_stub_51,
    52 => isr_stub_52, 53 => isr_stub_53, 54 => isr_stub_54, 55 => isr_stub_55,
    56 => isr_stub_56, 57 => isr_stub_57, 58 => isr_stub_58, 59 => isr_stub_59,
    60 => isr_stub_60, 61 => isr_stub_61, 62 => isr_stub_62, 63 => isr_stub_63,
    64 => isr_stub_64, 65 => isr_stub_65, 66 => isr_stub_66, 67 => isr_stub_67,
    68 => isr_stub_68, 69 => isr_stub_69, 70 => isr_stub_70, 71 => isr_stub_71,
    72 => isr_stub_72, 73 => isr_stub_73, 74 => isr_stub_74, 75 => isr_stub_75,
    76 => isr_stub_76, 77 => isr_stub_77, 78 => isr_stub_78, 79 => isr_stub_79,
    80 => isr_stub_80, 81 => isr_stub_81, 82 => isr_stub_82, 83 => isr_stub_83,
    84 => isr_stub_84, 85 => isr_stub_85, 86 => isr_stub_86, 87 => isr_stub_87,
    88 => isr_stub_88, 89 => isr_stub_89, 90 => isr_stub_90, 91 => isr_stub_91,
    92 => isr_stub_92, 93 => isr_stub_93, 94 => isr_stub_94, 95 => isr_stub_95,
    96 => isr_stub_96, 97 => isr_stub_97, 98 => isr_stub_98, 99 => isr_stub_99,
    100 => isr_stub_100, 101 => isr_stub_101, 102 => isr_stub_102, 103 => isr_stub_103,
    104 => isr_stub_104, 105 => isr_stub_105, 106 => isr_stub_106, 107 => isr_stub_107,
    108 => isr_stub_108, 109 => isr_stub_109, 110 => isr_stub_110, 111 => isr_stub_111,
    112 => isr_stub_112, 113 => isr_stub_113, 114 => isr_stub_114, 115 => isr_stub_115,
    116 => isr_stub_116, 117 => isr_stub_117, 118 => isr_stub_118, 119 => isr_stub_119,
    120 => isr_stub_120, 121 => isr_stub_121, 122 => isr_stub_122, 123 => isr_stub_123,
    124 => isr_stub_124, 125 => isr_stub_125, 126 => isr_stub_126, 127 => isr_stub_127,
    128 => isr_stub_128, 129 => isr_stub_129, 130 => isr_stub_130, 131 => isr_stub_131,
    132 => isr_stub_132, 133 => isr_stub_133, 134 => isr_stub_134, 135 => isr_stub_135,
    136 => isr_stub_136, 137 => isr_stub_137, 138 => isr_stub_138, 139 => isr_stub_139,
    140 => isr_stub_140, 141 => isr_stub_141, 142 => isr_stub_142, 143 => isr_stub_143,
    144 => isr_stub_144, 145 => isr_stub_145, 146 => isr_stub_146, 147 => isr_stub_147,
    148 => isr_stub_148, 149 => isr_stub_149, 150 => isr_stub_150, 151 => isr_stub_151,
    152 => isr_stub_152, 153 => isr_stub_153, 154 => isr_stub_154, 155 => isr_stub_155,
    156 => isr_stub_156, 157 => isr_stub_157, 158 => isr_stub_158, 159 => isr_stub_159,
    160 => isr_stub_160, 161 => isr_stub_161, 162 => isr_stub_162, 163 => isr_stub_163,
    164 => isr_stub_164, 165 => isr_stub_165, 166 => isr_stub_166, 167 => isr_stub_167,
    168 => isr_stub_168, 169 => isr_stub_169, 170 => isr_stub_170, 171 => isr_stub_171,
    172 => isr_stub_172, 173 => isr_stub_173, 174 => isr_stub_174, 175 => isr_stub_175,
    176 => isr_stub_176, 177 => isr_stub_177, 178 => isr_stub_178, 179 => isr_stub_179,
    180 => isr_stub_180, 181 => isr_stub_181, 182 => isr_stub_182, 183 => isr_stub_183,
    184 => isr_stub_184, 185 => isr_stub_185, 186 => isr_stub_186, 187 => isr_stub_187,
    188 => isr_stub_188, 189 => isr_stub_189, 190 => isr_stub_190, 191 => isr_stub_191,
    192 => isr_stub_192, 193 => isr_stub_193, 194 => isr_stub_194, 195 => isr_stub_195,
    196 => isr_stub_196, 197 => isr_stub_197, 198 => isr_stub_198, 199 => isr_stub_199,
    200 => isr_stub_200, 201 => isr_stub_201, 202 => isr_stub_202, 203 => isr_stub_203,
    204 => isr_stub_204, 205 => isr_stub_205, 206 => isr_stub_206, 207 => isr_stub_207,
    208 => isr_stub_208, 209 => isr_stub_209, 210 => isr_stub_210, 211 => isr_stub_211,
    212 => isr_stub_212, 213 => isr_stub_213, 214 => isr_stub_214, 215 => isr_stub_215,
    216 => isr_stub_216, 217 => isr_stub_217, 218 => isr_stub_218, 219 => isr_stub_219,
    220 => isr_stub_220, 221 => isr_stub_221, 222 => isr_stub_222, 223 => isr_stub_223,
    224 => isr_stub_224, 225 => isr_stub_225, 226 => isr_stub_226, 227 => isr_stub_227,
    228 => isr_stub_228, 229 => isr_stub_229, 230 => isr_stub_230, 231 => isr_stub_231,
    232 => isr_stub_232, 233 => isr_stub_233, 234 => isr_stub_234, 235 => isr_stub_235,
    236 => isr_stub_236, 237 => isr_stub_237, 238 => isr_stub_238, 239 => isr_stub_239,
    240 => isr_stub_240, 241 => isr_stub_241, 242 => isr_stub_242, 243 => isr_stub_243,
    244 => isr_stub_244, 245 => isr_stub_245, 246 => isr_stub_246, 247 => isr_stub_247,
    248 => isr_stub_248, 249 => isr_stub_249, 250 => isr_stub_250, 251 => isr_stub_251,
    252 => isr_stub_252, 253 => isr_stub_253, 254 => isr_stub_254, 255 => isr_stub_255,
}
