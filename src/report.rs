// 该文件是 Terminus （桥路巡检） 项目的一部分。
// src/report.rs - 巡检报告生成
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! A4 PDF 巡检报告。
//!
//! 文本使用嵌入的 DejaVu Sans（Type0 / Identity-H）。报告中出现的每个字符分配一个 CID，
//! 由 ToUnicode 映射回原字符，字体中没有字形的字符同样可以原样提取。
//! 标注图像以 JPEG 嵌入，视频只记录文件路径。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontRef, GlyphId, InvalidFont};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use thiserror::Error;
use tracing::{debug, info};

use crate::record::{InspectionRecord, InventoryAsset};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const TEXT_WIDTH: i64 = PAGE_WIDTH - 2 * MARGIN;
const TITLE_SIZE: i64 = 18;
const HEADING_SIZE: i64 = 13;
const BODY_SIZE: i64 = 11;
const BODY_INDENT: i64 = 12;
const LINE_GAP: i64 = 5;
const MAX_IMAGE_HEIGHT: i64 = 420;
const JPEG_QUALITY: u8 = 85;
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const FONT_NAME: &str = "DejaVuSans";
/// PDF 字形空间单位
const GLYPH_UNITS: f32 = 1000.0;
/// 每个 bfchar 段最多 100 项
const BFCHAR_CHUNK: usize = 100;

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("标注文件不存在: {0}")]
  ArtifactMissing(PathBuf),
  #[error("记录属于资产 {record}, 而不是资产 {asset}")]
  AssetMismatch { record: i64, asset: i64 },
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("字体错误: {0}")]
  Font(#[from] InvalidFont),
  #[error("PDF 错误: {0}")]
  Pdf(#[from] lopdf::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 生成的报告
pub struct ReportDocument {
  doc: Document,
  /// 字体的 ToUnicode CMap
  to_unicode: ObjectId,
}

impl ReportDocument {
  pub fn page_count(&self) -> usize {
    self.doc.get_pages().len()
  }

  /// 按页面顺序读取报告中的每一行文本
  ///
  /// 字符编码经由文档中的 ToUnicode CMap 还原。
  pub fn text_lines(&self) -> Result<Vec<String>, ReportError> {
    let cmap = self.doc.get_object(self.to_unicode)?.as_stream()?;
    let chars = parse_to_unicode(&cmap.content);

    let mut lines = Vec::new();
    for page_id in self.doc.get_pages().into_values() {
      let content = Content::decode(&self.doc.get_page_content(page_id)?)?;
      for operation in content.operations.iter().filter(|op| op.operator == "Tj") {
        if let Some(Object::String(bytes, _)) = operation.operands.first() {
          lines.push(decode_text(bytes, &chars));
        }
      }
    }
    Ok(lines)
  }

  pub fn to_bytes(&mut self) -> Result<Vec<u8>, ReportError> {
    let mut bytes = Vec::new();
    self.doc.save_to(&mut bytes)?;
    Ok(bytes)
  }

  pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ReportError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    self.doc.save(path)?;
    info!("报告已保存: {}", path.display());
    Ok(())
  }
}

/// 报告字体
///
/// CID 从 1 开始按字符首次出现的顺序分配，0 保留给缺失字形。
struct ReportFont {
  font: FontRef<'static>,
  units_per_em: f32,
  cids: BTreeMap<char, u16>,
}

impl ReportFont {
  fn load() -> Result<Self, ReportError> {
    let font = FontRef::try_from_slice(FONT_DATA)?;
    let units_per_em = font.units_per_em().unwrap_or(GLYPH_UNITS);
    Ok(Self {
      font,
      units_per_em,
      cids: BTreeMap::new(),
    })
  }

  /// 编码为两字节 CID 序列
  fn encode(&mut self, text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() * 2);
    for c in text.chars() {
      let next = u16::try_from(self.cids.len() + 1).unwrap_or(0);
      let cid = *self.cids.entry(c).or_insert(next);
      bytes.extend_from_slice(&cid.to_be_bytes());
    }
    bytes
  }

  fn glyph(&self, c: char) -> GlyphId {
    self.font.glyph_id(c)
  }

  /// 字符宽度（字形空间单位）
  fn advance(&self, c: char) -> f32 {
    self.font.h_advance_unscaled(self.glyph(c)) * GLYPH_UNITS / self.units_per_em
  }

  fn width(&self, text: &str, size: i64) -> f32 {
    text.chars().map(|c| self.advance(c)).sum::<f32>() * size as f32 / GLYPH_UNITS
  }

  /// 按单词折行，单个单词超宽时按字符断开
  fn wrap(&self, text: &str, size: i64, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line: Option<String> = None;
    for word in text.split(' ') {
      let candidate = match &line {
        Some(current) => format!("{} {}", current, word),
        None => word.to_string(),
      };
      if self.width(&candidate, size) <= max_width {
        line = Some(candidate);
        continue;
      }

      lines.extend(line.take());
      let mut piece = String::new();
      for c in word.chars() {
        piece.push(c);
        if piece.chars().count() > 1 && self.width(&piece, size) > max_width {
          piece.pop();
          lines.push(std::mem::take(&mut piece));
          piece.push(c);
        }
      }
      line = Some(piece);
    }
    lines.extend(line);
    lines
  }

  /// 按 CID 顺序排列的字符
  fn by_cid(&self) -> Vec<(u16, char)> {
    let mut chars: Vec<(u16, char)> = self.cids.iter().map(|(c, cid)| (*cid, *c)).collect();
    chars.sort_unstable();
    chars
  }
}

/// ToUnicode CMap，每个 CID 对应一个 UTF-16BE 字符
fn to_unicode_cmap(chars: &[(u16, char)]) -> Vec<u8> {
  let mut cmap = String::from(
    "/CIDInit /ProcSet findresource begin\n\
     12 dict begin\n\
     begincmap\n\
     /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
     /CMapName /Adobe-Identity-UCS def\n\
     /CMapType 2 def\n\
     1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
  );
  for chunk in chars.chunks(BFCHAR_CHUNK) {
    cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
    for (cid, c) in chunk {
      let mut units = [0u16; 2];
      let utf16: String = c
        .encode_utf16(&mut units)
        .iter()
        .map(|u| format!("{:04X}", u))
        .collect();
      cmap.push_str(&format!("<{:04X}> <{}>\n", cid, utf16));
    }
    cmap.push_str("endbfchar\n");
  }
  cmap.push_str("endcmap\nCMapName currentdict /defineresource pop\nend\nend\n");
  cmap.into_bytes()
}

fn parse_hex_units(hex: &str) -> Option<Vec<u16>> {
  if hex.len() % 4 != 0 {
    return None;
  }
  (0..hex.len())
    .step_by(4)
    .map(|i| u16::from_str_radix(hex.get(i..i + 4)?, 16).ok())
    .collect()
}

/// 读取 bfchar 段中的 `<CID> <UTF-16BE>` 映射
fn parse_to_unicode(cmap: &[u8]) -> BTreeMap<u16, String> {
  let text = String::from_utf8_lossy(cmap);
  let mut chars = BTreeMap::new();
  let mut in_bfchar = false;
  for line in text.lines().map(str::trim) {
    if line.ends_with("beginbfchar") {
      in_bfchar = true;
      continue;
    }
    if line == "endbfchar" {
      in_bfchar = false;
      continue;
    }
    if !in_bfchar {
      continue;
    }
    let hex: Vec<&str> = line
      .split(['<', '>'])
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .collect();
    let [code, unicode] = hex.as_slice() else {
      continue;
    };
    let (Some(code), Some(unicode)) = (parse_hex_units(code), parse_hex_units(unicode)) else {
      continue;
    };
    if let [cid] = code.as_slice() {
      chars.insert(*cid, String::from_utf16_lossy(&unicode));
    }
  }
  chars
}

fn decode_text(bytes: &[u8], chars: &BTreeMap<u16, String>) -> String {
  bytes
    .chunks_exact(2)
    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    .map(|cid| chars.get(&cid).map_or("\u{fffd}", String::as_str))
    .collect()
}

fn is_image_artifact(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// 嵌入的 JPEG 图像
struct EmbeddedImage {
  width: i64,
  height: i64,
  jpeg: Vec<u8>,
}

impl EmbeddedImage {
  fn load(path: &Path) -> Result<Self, ReportError> {
    let image: RgbImage = image::open(path)?.into_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&image)?;
    Ok(Self {
      width: image.width() as i64,
      height: image.height() as i64,
      jpeg,
    })
  }

  /// 等比缩放到版心宽度与最大高度以内
  fn fit(&self) -> (i64, i64) {
    let max_width = TEXT_WIDTH;
    if self.width == 0 || self.height == 0 {
      return (0, 0);
    }
    let scale = (max_width as f64 / self.width as f64)
      .min(MAX_IMAGE_HEIGHT as f64 / self.height as f64)
      .min(1.0);
    (
      ((self.width as f64 * scale).round() as i64).max(1),
      ((self.height as f64 * scale).round() as i64).max(1),
    )
  }
}

/// 逐行排版，空间不足时换页，超出版心宽度时折行
struct PageLayout {
  pages: Vec<Vec<Operation>>,
  y: i64,
  font: ReportFont,
}

impl PageLayout {
  fn new(font: ReportFont) -> Self {
    Self {
      pages: vec![Vec::new()],
      y: PAGE_HEIGHT - MARGIN,
      font,
    }
  }

  fn new_page(&mut self) {
    self.pages.push(Vec::new());
    self.y = PAGE_HEIGHT - MARGIN;
  }

  fn current(&mut self) -> &mut Vec<Operation> {
    if self.pages.is_empty() {
      self.pages.push(Vec::new());
    }
    let last = self.pages.len() - 1;
    &mut self.pages[last]
  }

  fn reserve(&mut self, height: i64) {
    if self.y - height < MARGIN {
      self.new_page();
    }
  }

  fn text(&mut self, text: &str, size: i64, indent: i64) {
    let line_height = size + LINE_GAP;
    for line in self.font.wrap(text, size, (TEXT_WIDTH - indent) as f32) {
      self.reserve(line_height);
      self.y -= line_height;
      let y = self.y;
      let encoded = self.font.encode(&line);
      self.current().extend([
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), Object::Integer(size)]),
        Operation::new("Td", vec![Object::Integer(MARGIN + indent), Object::Integer(y)]),
        Operation::new("Tj", vec![Object::String(encoded, StringFormat::Hexadecimal)]),
        Operation::new("ET", vec![]),
      ]);
    }
  }

  fn heading(&mut self, text: &str) {
    self.gap(BODY_SIZE / 2);
    self.text(text, HEADING_SIZE, 0);
  }

  fn body(&mut self, text: &str) {
    self.text(text, BODY_SIZE, BODY_INDENT);
  }

  fn gap(&mut self, height: i64) {
    self.y -= height;
  }

  fn image(&mut self, name: &str, width: i64, height: i64) {
    self.reserve(height + LINE_GAP);
    self.y -= height + LINE_GAP;
    let y = self.y;
    self.current().extend([
      Operation::new("q", vec![]),
      Operation::new(
        "cm",
        vec![
          Object::Integer(width),
          Object::Integer(0),
          Object::Integer(0),
          Object::Integer(height),
          Object::Integer(MARGIN),
          Object::Integer(y),
        ],
      ),
      Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
      Operation::new("Q", vec![]),
    ]);
  }
}

fn format_time(time: &chrono::DateTime<chrono::Utc>) -> String {
  time.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// 按首次出现顺序统计每个类别的数量
fn defect_summary(defects: &[String]) -> Vec<(&str, usize)> {
  let mut summary: Vec<(&str, usize)> = Vec::new();
  for defect in defects {
    match summary.iter_mut().find(|(label, _)| *label == defect.as_str()) {
      Some((_, count)) => *count += 1,
      None => summary.push((defect.as_str(), 1)),
    }
  }
  summary
}

/// 生成巡检报告
///
/// 缺陷按记录中的顺序逐行列出，文本与记录完全一致。
pub fn generate_report(
  record: &InspectionRecord,
  asset: &InventoryAsset,
) -> Result<ReportDocument, ReportError> {
  if record.asset_id != asset.id {
    return Err(ReportError::AssetMismatch {
      record: record.asset_id,
      asset: asset.id,
    });
  }
  if !record.artifact.exists() {
    return Err(ReportError::ArtifactMissing(record.artifact.clone()));
  }
  let image = if is_image_artifact(&record.artifact) {
    Some(EmbeddedImage::load(&record.artifact)?)
  } else {
    None
  };

  let mut layout = PageLayout::new(ReportFont::load()?);
  layout.text("Structural Inspection Report", TITLE_SIZE, 0);
  layout.body(&format!("Inspection #{}", record.id));

  layout.heading("Asset");
  layout.body(&format!("ID: {}", asset.id));
  layout.body(&format!("Name: {}", asset.name));
  layout.body(&format!("Location: {}", asset.location));
  layout.body(&format!("Type: {}", asset.asset_type));
  layout.body(&format!("Built: {}", asset.built_year));
  layout.body(&format!(
    "Last inspection: {}",
    asset
      .last_inspection
      .as_ref()
      .map(format_time)
      .unwrap_or_else(|| "never".to_string())
  ));

  layout.heading("Inspection");
  layout.body(&format!("Date: {}", format_time(&record.date)));
  layout.body(&format!(
    "Severity: {}",
    record.severity.as_deref().unwrap_or("not assessed")
  ));
  layout.body(&format!("Length: {:.2} m", record.measurements.length));
  layout.body(&format!("Width: {:.2} m", record.measurements.width));
  layout.body(&format!("Area: {:.2} m\u{b2}", record.measurements.area()));

  layout.heading("Defect summary");
  if record.defects.is_empty() {
    layout.body("No defects detected");
  }
  for (label, count) in defect_summary(&record.defects) {
    layout.body(&format!("{}: {}", label, count));
  }

  layout.heading("Defects");
  for (n, label) in record.defects.iter().enumerate() {
    layout.body(&format!("{}. {}", n + 1, label));
  }

  layout.heading("Annotated artifact");
  match &image {
    Some(image) => {
      layout.body(&format!("Image: {}", record.artifact.display()));
      let (width, height) = image.fit();
      if width > 0 && height > 0 {
        layout.image("Im1", width, height);
      }
    }
    None => layout.body(&format!("Video: {}", record.artifact.display())),
  }

  layout.gap(LINE_GAP);
  layout.text(
    &format!("Generated {}", format_time(&chrono::Utc::now())),
    BODY_SIZE - 2,
    0,
  );

  let (doc, to_unicode) = assemble(layout.pages, &layout.font, image)?;
  debug!("报告共 {} 页, {} 个字符", doc.get_pages().len(), layout.font.cids.len());
  Ok(ReportDocument { doc, to_unicode })
}

/// Type0 字体：CIDFontType2 子字体嵌入完整的 TrueType 文件
fn add_font(doc: &mut Document, font: &ReportFont) -> (ObjectId, ObjectId) {
  let chars = font.by_cid();
  let scale = GLYPH_UNITS / font.units_per_em;
  let ascent = (font.font.ascent_unscaled() * scale).round() as i64;
  let descent = (font.font.descent_unscaled() * scale).round() as i64;

  let file_id = doc.add_object(Stream::new(
    dictionary! { "Length1" => FONT_DATA.len() as i64 },
    FONT_DATA.to_vec(),
  ));
  let descriptor_id = doc.add_object(dictionary! {
    "Type" => "FontDescriptor",
    "FontName" => FONT_NAME,
    "Flags" => Object::Integer(32),
    "FontBBox" => vec![
      Object::Integer(0),
      Object::Integer(descent),
      Object::Integer(GLYPH_UNITS as i64),
      Object::Integer(ascent),
    ],
    "ItalicAngle" => Object::Integer(0),
    "Ascent" => Object::Integer(ascent),
    "Descent" => Object::Integer(descent),
    "CapHeight" => Object::Integer(ascent),
    "StemV" => Object::Integer(80),
    "FontFile2" => file_id,
  });

  let mut gid_map = vec![0u8; (chars.len() + 1) * 2];
  let mut widths = Vec::with_capacity(chars.len());
  for (cid, c) in &chars {
    let at = *cid as usize * 2;
    if let Some(slot) = gid_map.get_mut(at..at + 2) {
      slot.copy_from_slice(&font.glyph(*c).0.to_be_bytes());
    }
    widths.push(Object::Integer(font.advance(*c).round() as i64));
  }
  let gid_map_id = doc.add_object(Stream::new(dictionary! {}, gid_map));

  let cid_font_id = doc.add_object(dictionary! {
    "Type" => "Font",
    "Subtype" => "CIDFontType2",
    "BaseFont" => FONT_NAME,
    "CIDSystemInfo" => dictionary! {
      "Registry" => Object::string_literal("Adobe"),
      "Ordering" => Object::string_literal("Identity"),
      "Supplement" => Object::Integer(0),
    },
    "FontDescriptor" => descriptor_id,
    "DW" => Object::Integer(GLYPH_UNITS as i64),
    "W" => vec![Object::Integer(1), Object::Array(widths)],
    "CIDToGIDMap" => gid_map_id,
  });

  let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&chars)));
  let font_id = doc.add_object(dictionary! {
    "Type" => "Font",
    "Subtype" => "Type0",
    "BaseFont" => FONT_NAME,
    "Encoding" => "Identity-H",
    "DescendantFonts" => vec![Object::Reference(cid_font_id)],
    "ToUnicode" => to_unicode_id,
  });
  (font_id, to_unicode_id)
}

fn assemble(
  pages: Vec<Vec<Operation>>,
  font: &ReportFont,
  image: Option<EmbeddedImage>,
) -> Result<(Document, ObjectId), ReportError> {
  let mut doc = Document::with_version("1.5");
  let pages_id = doc.new_object_id();
  let (font_id, to_unicode_id) = add_font(&mut doc, font);

  let mut resources: Dictionary = dictionary! {
    "Font" => dictionary! { "F1" => font_id },
  };
  if let Some(image) = image {
    let stream = Stream::new(
      dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(image.width),
        "Height" => Object::Integer(image.height),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => Object::Integer(8),
        "Filter" => "DCTDecode",
      },
      image.jpeg,
    )
    .with_compression(false);
    let image_id = doc.add_object(stream);
    resources.set("XObject", dictionary! { "Im1" => image_id });
  }
  let resources_id = doc.add_object(resources);

  let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
  for operations in pages {
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id: ObjectId = doc.add_object(dictionary! {
      "Type" => "Page",
      "Parent" => pages_id,
      "Contents" => content_id,
      "Resources" => resources_id,
    });
    kids.push(page_id.into());
  }

  let count = kids.len() as i64;
  doc.objects.insert(
    pages_id,
    Object::Dictionary(dictionary! {
      "Type" => "Pages",
      "Kids" => kids,
      "Count" => Object::Integer(count),
      "MediaBox" => vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(PAGE_WIDTH),
        Object::Integer(PAGE_HEIGHT),
      ],
    }),
  );

  let catalog_id = doc.add_object(dictionary! {
    "Type" => "Catalog",
    "Pages" => pages_id,
  });
  doc.trailer.set("Root", catalog_id);
  Ok((doc, to_unicode_id))
}
