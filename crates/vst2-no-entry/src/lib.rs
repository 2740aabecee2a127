//! Exports a single unrelated symbol, so loading it as a plug-in finds
//! neither `VSTPluginMain` nor `main`.

#[no_mangle]
pub extern "C" fn vst2_no_entry_marker() -> u32 {
    0x4E4F_454E
}
