use slotmap::new_key_type;

new_key_type! { pub struct GfxBufferHandle; }
new_key_type! { pub struct GfxImageHandle; }
new_key_type! { pub struct GfxImageViewHandle; }
