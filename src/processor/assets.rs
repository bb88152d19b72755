//! Converts project resources into packed, content-addressed blobs.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{AssetError, AssetErrors};
use crate::model::{AssetKind, AssetSource, Palette, ProjectSnapshot};
use crate::processor::tables::{asset_symbol, palette_symbol};

const TILE: u32 = 8;
const TILE_BYTES: usize = 16;
const WAVE_CHUNK: usize = 16;
const MAX_TILESET_TILES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedKind {
    Asset(AssetKind),
    Palette,
}

impl PackedKind {
    fn tag(self) -> &'static [u8] {
        match self {
            PackedKind::Asset(kind) => kind.as_str().as_bytes(),
            PackedKind::Palette => b"palette",
        }
    }

    pub fn align(self) -> usize {
        match self {
            PackedKind::Asset(AssetKind::Image | AssetKind::Tileset) => TILE_BYTES,
            _ => 1,
        }
    }
}

/// A decoded resource. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedAsset {
    pub digest: [u8; 32],
    pub kind: PackedKind,
    pub payload: Vec<u8>,
    pub align: usize,
}

impl PackedAsset {
    fn new(kind: PackedKind, payload: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.tag());
        hasher.update([0u8]);
        hasher.update(&payload);
        Self {
            digest: hasher.finalize().into(),
            kind,
            payload,
            align: kind.align(),
        }
    }

    pub fn hex_digest(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Physical symbol name; identical content always gets the same name.
    pub fn symbol(&self) -> String {
        format!("blob_{}", &self.hex_digest()[..16])
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackedAssets {
    /// One entry per distinct digest, in first-seen order.
    pub packed: Vec<PackedAsset>,
    /// Logical symbol (`asset_*`, `palette_*`) → index into `packed`.
    pub aliases: IndexMap<String, usize>,
}

impl PackedAssets {
    fn insert(
        &mut self,
        logical: String,
        asset: PackedAsset,
        by_digest: &mut HashMap<[u8; 32], usize>,
    ) {
        let index = *by_digest.entry(asset.digest).or_insert_with(|| {
            self.packed.push(asset);
            self.packed.len() - 1
        });
        self.aliases.insert(logical, index);
    }

    pub fn get(&self, logical: &str) -> Option<&PackedAsset> {
        self.aliases.get(logical).map(|&i| &self.packed[i])
    }
}

/// Pack every asset and palette of the project.
///
/// Every resource is attempted; all failures are returned together.
pub fn pack_all(project: &ProjectSnapshot, root: &Path) -> Result<PackedAssets, AssetErrors> {
    let mut out = PackedAssets::default();
    let mut by_digest = HashMap::new();
    let mut memo: HashMap<(AssetKind, [u8; 32]), Vec<u8>> = HashMap::new();
    let mut errors = Vec::new();

    for source in &project.assets {
        match pack_source(source, root, &mut memo) {
            Ok(asset) => {
                debug!(
                    "{} -> {} ({} bytes)",
                    source.path.display(),
                    asset.symbol(),
                    asset.payload.len()
                );
                out.insert(asset_symbol(&source.name), asset, &mut by_digest);
            }
            Err(e) => {
                warn!("{e}");
                errors.push(e);
            }
        }
    }

    for palette in &project.palettes {
        let asset = PackedAsset::new(PackedKind::Palette, encode_palette(palette));
        out.insert(palette_symbol(&palette.name), asset, &mut by_digest);
    }

    if !errors.is_empty() {
        return Err(AssetErrors(errors));
    }

    info!(
        "packed {} asset references into {} unique blobs",
        out.aliases.len(),
        out.packed.len()
    );
    Ok(out)
}

fn pack_source(
    source: &AssetSource,
    root: &Path,
    memo: &mut HashMap<(AssetKind, [u8; 32]), Vec<u8>>,
) -> Result<PackedAsset, AssetError> {
    let bytes = std::fs::read(root.join(&source.path)).map_err(|e| AssetError::Io {
        path: source.path.clone(),
        source: e,
    })?;
    let file_digest: [u8; 32] = Sha256::digest(&bytes).into();

    let payload = match memo.get(&(source.kind, file_digest)) {
        Some(payload) => {
            debug!("{}: reusing earlier decode", source.path.display());
            payload.clone()
        }
        None => {
            let payload = decode(source, &bytes)?;
            memo.insert((source.kind, file_digest), payload.clone());
            payload
        }
    };
    Ok(PackedAsset::new(PackedKind::Asset(source.kind), payload))
}

fn decode(source: &AssetSource, bytes: &[u8]) -> Result<Vec<u8>, AssetError> {
    let path = &source.path;
    match source.kind {
        AssetKind::Image => {
            let shades = decode_shades(path, bytes)?;
            encode_image(&shades)
        }
        AssetKind::Tileset => {
            let shades = decode_shades(path, bytes)?;
            encode_tileset(&shades).map_err(|reason| AssetError::Unsupported {
                path: path.clone(),
                kind: "tileset",
                reason,
            })
        }
        AssetKind::Song => encode_song(path, bytes),
        AssetKind::Sound => encode_sound(path, bytes),
    }
}

// ─────────────────────────────────────────────────────
// Graphics
// ─────────────────────────────────────────────────────

/// Image reduced to 4 shades (0 = lightest), dimensions in tiles.
struct Shades {
    w_tiles: u8,
    h_tiles: u8,
    px: Vec<u8>,
}

impl Shades {
    fn width(&self) -> usize {
        usize::from(self.w_tiles) * TILE as usize
    }

    /// 2bpp planar encoding of the tile at (tx, ty).
    fn tile(&self, tx: usize, ty: usize) -> [u8; TILE_BYTES] {
        let mut out = [0u8; TILE_BYTES];
        for row in 0..TILE as usize {
            let (mut lo, mut hi) = (0u8, 0u8);
            let line = (ty * TILE as usize + row) * self.width() + tx * TILE as usize;
            for col in 0..TILE as usize {
                let shade = self.px[line + col];
                let bit = 7 - col;
                lo |= (shade & 1) << bit;
                hi |= ((shade >> 1) & 1) << bit;
            }
            out[row * 2] = lo;
            out[row * 2 + 1] = hi;
        }
        out
    }

    fn tiles(&self) -> impl Iterator<Item = [u8; TILE_BYTES]> + '_ {
        (0..usize::from(self.h_tiles))
            .flat_map(move |ty| (0..usize::from(self.w_tiles)).map(move |tx| self.tile(tx, ty)))
    }
}

fn decode_shades(path: &Path, bytes: &[u8]) -> Result<Shades, AssetError> {
    let img = image::load_from_memory(bytes).map_err(|e| AssetError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let img = img.to_luma_alpha8();
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || w % TILE != 0 || h % TILE != 0 {
        return Err(AssetError::Decode {
            path: path.to_path_buf(),
            reason: format!("{w}x{h} is not a multiple of {TILE}x{TILE} tiles"),
        });
    }
    let (w_tiles, h_tiles) = match (u8::try_from(w / TILE), u8::try_from(h / TILE)) {
        (Ok(wt), Ok(ht)) => (wt, ht),
        _ => {
            return Err(AssetError::Decode {
                path: path.to_path_buf(),
                reason: format!("{w}x{h} exceeds 255 tiles per side"),
            });
        }
    };

    let px = img
        .pixels()
        .map(|p| {
            let [luma, alpha] = p.0;
            if alpha < 128 { 0 } else { (255 - luma) / 64 }
        })
        .collect();

    Ok(Shades { w_tiles, h_tiles, px })
}

fn encode_image(shades: &Shades) -> Result<Vec<u8>, AssetError> {
    let mut out = vec![shades.w_tiles, shades.h_tiles];
    for tile in shades.tiles() {
        out.extend_from_slice(&tile);
    }
    Ok(out)
}

fn encode_tileset(shades: &Shades) -> Result<Vec<u8>, String> {
    let mut unique: IndexMap<[u8; TILE_BYTES], u8> = IndexMap::new();
    let mut map = Vec::with_capacity(usize::from(shades.w_tiles) * usize::from(shades.h_tiles));
    for tile in shades.tiles() {
        let next = unique.len();
        if next >= MAX_TILESET_TILES && !unique.contains_key(&tile) {
            return Err(format!("more than {MAX_TILESET_TILES} unique tiles"));
        }
        let index = *unique.entry(tile).or_insert(next as u8);
        map.push(index);
    }

    let mut out = vec![shades.w_tiles, shades.h_tiles];
    out.extend_from_slice(&(unique.len() as u16).to_le_bytes());
    out.extend_from_slice(&map);
    for tile in unique.keys() {
        out.extend_from_slice(tile);
    }
    Ok(out)
}

fn encode_palette(palette: &Palette) -> Vec<u8> {
    palette
        .colors
        .iter()
        .flat_map(|[r, g, b]| {
            let bgr555 = u16::from(r >> 3) | (u16::from(g >> 3) << 5) | (u16::from(b >> 3) << 10);
            bgr555.to_le_bytes()
        })
        .collect()
}

// ─────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────

fn encode_song(path: &Path, bytes: &[u8]) -> Result<Vec<u8>, AssetError> {
    let text = std::str::from_utf8(bytes).map_err(|e| AssetError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut rows = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let reg = frequency_register(line).map_err(|reason| AssetError::Decode {
            path: path.to_path_buf(),
            reason: format!("line {}: {reason}", n + 1),
        })?;
        rows.push(reg);
    }

    let count = u16::try_from(rows.len()).map_err(|_| AssetError::Unsupported {
        path: path.to_path_buf(),
        kind: "song",
        reason: format!("{} rows, at most {}", rows.len(), u16::MAX),
    })?;
    let mut out = count.to_le_bytes().to_vec();
    for reg in rows {
        out.extend_from_slice(&reg.to_le_bytes());
    }
    Ok(out)
}

/// `C-4` / `C#4` → 11-bit channel frequency register; `---` is a rest (0).
fn frequency_register(note: &str) -> Result<u16, String> {
    if note == "---" {
        return Ok(0);
    }
    let mut chars = note.chars();
    let semitone: i32 = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(format!("`{note}` is not a note")),
    };
    let semitone = match chars.next() {
        Some('#') => semitone + 1,
        Some('-') => semitone,
        _ => return Err(format!("`{note}` needs `-` or `#` after the letter")),
    };
    let octave: i32 = chars
        .as_str()
        .parse()
        .map_err(|_| format!("`{note}` has no valid octave"))?;

    let midi = (octave + 1) * 12 + semitone;
    let hz = 440.0 * 2f64.powf(f64::from(midi - 69) / 12.0);
    let reg = (2048.0 - 131072.0 / hz).round();
    if !(0.0..2048.0).contains(&reg) {
        return Err(format!("`{note}` ({hz:.1} Hz) is outside the channel's range"));
    }
    Ok(reg as u16)
}

fn encode_sound(path: &Path, bytes: &[u8]) -> Result<Vec<u8>, AssetError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if !matches!(ext.as_deref(), Some("raw" | "pcm")) {
        return Err(AssetError::Unsupported {
            path: path.to_path_buf(),
            kind: "sound",
            reason: "expected unsigned 8-bit PCM (.raw or .pcm)".to_string(),
        });
    }
    if bytes.is_empty() {
        return Err(AssetError::Decode {
            path: path.to_path_buf(),
            reason: "no samples".to_string(),
        });
    }
    let count = u16::try_from(bytes.len()).map_err(|_| AssetError::Unsupported {
        path: path.to_path_buf(),
        kind: "sound",
        reason: format!("{} samples, at most {}", bytes.len(), u16::MAX),
    })?;

    let mut packed: Vec<u8> = bytes
        .chunks(2)
        .map(|pair| {
            let hi = pair[0] >> 4;
            let lo = pair.get(1).map_or(0, |s| s >> 4);
            (hi << 4) | lo
        })
        .collect();
    let padded = packed.len().div_ceil(WAVE_CHUNK) * WAVE_CHUNK;
    packed.resize(padded, 0);

    let mut out = count.to_le_bytes().to_vec();
    out.extend_from_slice(&packed);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::load_from_json;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    const GRAYS: [u8; 4] = [255, 170, 85, 0];

    fn checker(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let g = GRAYS[((x / 8 + y / 8) % 4) as usize];
            Rgb([g, g, g])
        })
    }

    fn project(assets: &str) -> ProjectSnapshot {
        load_from_json(&format!(r#"{{ "assets": [{assets}] }}"#)).unwrap()
    }

    #[test]
    fn tile_encoding_is_2bpp_planar() {
        // One tile; row 0 = shades 0,1,2,3,0,1,2,3, other rows lightest.
        let mut px = vec![0u8; 64];
        px[..8].copy_from_slice(&[0, 1, 2, 3, 0, 1, 2, 3]);
        let shades = Shades { w_tiles: 1, h_tiles: 1, px };
        let tile = shades.tile(0, 0);
        assert_eq!(tile[0], 0b0101_0101);
        assert_eq!(tile[1], 0b0011_0011);
        assert!(tile[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn identical_pixels_in_different_formats_pack_once() {
        let dir = TempDir::new().unwrap();
        let img = checker(16, 8);
        img.save(dir.path().join("a.png")).unwrap();
        img.save(dir.path().join("b.bmp")).unwrap();

        let p = project(
            r#"{ "name": "a", "kind": "image", "path": "a.png" },
               { "name": "b", "kind": "image", "path": "b.bmp" }"#,
        );
        let packed = pack_all(&p, dir.path()).unwrap();
        assert_eq!(packed.packed.len(), 1);
        assert_eq!(packed.aliases.len(), 2);
        assert_eq!(packed.get("asset_a"), packed.get("asset_b"));

        let asset = &packed.packed[0];
        assert_eq!(asset.payload.len(), 2 + 2 * TILE_BYTES);
        assert_eq!(&asset.payload[..2], &[2, 1]);
        assert_eq!(asset.align, TILE_BYTES);
    }

    #[test]
    fn tileset_deduplicates_tiles() {
        let dir = TempDir::new().unwrap();
        // 4x1 tiles, shades cycle 0,1,2,3 → 4 unique; 8x1 → still 4 unique.
        checker(64, 8).save(dir.path().join("bg.png")).unwrap();
        let p = project(r#"{ "name": "bg", "kind": "tileset", "path": "bg.png" }"#);
        let packed = pack_all(&p, dir.path()).unwrap();
        let payload = &packed.packed[0].payload;
        assert_eq!(&payload[..4], &[8, 1, 4, 0]);
        assert_eq!(&payload[4..12], &[0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(payload.len(), 4 + 8 + 4 * TILE_BYTES);
    }

    #[test]
    fn song_rows_become_frequency_registers() {
        assert_eq!(frequency_register("---"), Ok(0));
        // A-4 = 440 Hz → 2048 - 131072/440 = 1750.1
        assert_eq!(frequency_register("A-4"), Ok(1750));
        assert_eq!(frequency_register("C-6"), frequency_register("c-6"));
        assert!(frequency_register("C-1").is_err());
        assert!(frequency_register("H-4").is_err());
    }

    #[test]
    fn bad_song_line_is_reported_with_line_number() {
        let err = encode_song(Path::new("music/theme.txt"), b"# intro\nC-4\nZZZ\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("music/theme.txt"), "{msg}");
        assert!(msg.contains("line 3"), "{msg}");
    }

    #[test]
    fn sound_is_nibble_packed_and_padded() {
        let out = encode_sound(Path::new("sfx/beep.raw"), &[0xF0, 0x10, 0x80]).unwrap();
        assert_eq!(&out[..2], &[3, 0]);
        assert_eq!(out[2], 0xF1);
        assert_eq!(out[3], 0x80);
        assert_eq!(out.len(), 2 + WAVE_CHUNK);
    }

    #[test]
    fn palette_is_bgr555() {
        let pal = Palette {
            name: "p".into(),
            colors: [[255, 255, 255], [255, 0, 0], [0, 255, 0], [0, 0, 255]],
        };
        assert_eq!(
            encode_palette(&pal),
            vec![0xFF, 0x7F, 0x1F, 0x00, 0xE0, 0x03, 0x00, 0x7C]
        );
    }

    #[test]
    fn failures_are_collected_not_short_circuited() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.txt"), "C-4\n").unwrap();
        std::fs::write(dir.path().join("noise.wav"), [1, 2, 3]).unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let p = project(
            r#"{ "name": "missing", "kind": "image", "path": "nope.png" },
               { "name": "ok", "kind": "song", "path": "ok.txt" },
               { "name": "noise", "kind": "sound", "path": "noise.wav" },
               { "name": "broken", "kind": "image", "path": "broken.png" }"#,
        );
        let AssetErrors(errors) = pack_all(&p, dir.path()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[0], AssetError::Io { path, .. } if path == Path::new("nope.png")));
        assert!(matches!(&errors[1], AssetError::Unsupported { kind: "sound", .. }));
        assert!(matches!(
            &errors[2],
            AssetError::Decode { path, .. } if path == Path::new("broken.png")
        ));
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let dir = TempDir::new().unwrap();
        checker(10, 8).save(dir.path().join("odd.png")).unwrap();
        let p = project(r#"{ "name": "odd", "kind": "image", "path": "odd.png" }"#);
        assert!(pack_all(&p, dir.path()).is_err());
    }
}
