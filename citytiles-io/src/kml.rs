use once_cell::sync::Lazy;
use regex::Regex;

use citytiles_core::geometry::{LonLat, TileCoord, TileExtent};
use citytiles_core::model::GeoReference;

use crate::IoError;
use crate::xml::{Element, XmlDocument, XmlNode};

static TILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Tile_(\d+)_(\d+)").expect("tile name regex"));

/// 从文件夹名或路径中解析 `Tile_<x>_<y>`。
pub fn parse_tile_coord(text: &str) -> Option<TileCoord> {
    let captures = TILE_NAME.captures(text)?;
    let x = captures.get(1)?.as_str().parse().ok()?;
    let y = captures.get(2)?.as_str().parse().ok()?;
    Some(TileCoord::new(x, y))
}

pub const DEFAULT_ALTITUDE_MODE: &str = "relativeToGround";

/// 引用三维模型的地标。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPlacemark {
    pub name: String,
    pub altitude_mode: String,
    pub georeference: GeoReference,
    pub href: String,
}

impl ModelPlacemark {
    /// 解析 `<Placemark>`；不含 `Model` 的地标（例如瓦片边界）返回 `Ok(None)`。
    pub fn from_element(placemark: &Element) -> Result<Option<Self>, IoError> {
        let Some(model) = placemark.child("Model") else {
            return Ok(None);
        };
        let name = placemark
            .path_text(&["name"])
            .or_else(|| model.attribute("id").map(str::to_string))
            .unwrap_or_default();
        let context = if name.is_empty() {
            "<unnamed>"
        } else {
            name.as_str()
        };

        let longitude = required_f64(model, &["Location", "longitude"], context)?;
        let latitude = required_f64(model, &["Location", "latitude"], context)?;
        let altitude = optional_f64(model, &["Location", "altitude"], context)?.unwrap_or(0.0);
        let heading = optional_f64(model, &["Orientation", "heading"], context)?.unwrap_or(0.0);
        let href = model.path_text(&["Link", "href"]).ok_or_else(|| {
            IoError::InvalidDocument(format!("model placemark {context} has no Link/href"))
        })?;
        let altitude_mode = model
            .path_text(&["altitudeMode"])
            .unwrap_or_else(|| DEFAULT_ALTITUDE_MODE.to_string());

        Ok(Some(Self {
            name,
            altitude_mode,
            georeference: GeoReference::new(longitude, latitude, altitude, heading),
            href,
        }))
    }

    /// 生成与导出工具一致的地标结构，朝向保持原始约定。
    pub fn to_element(&self) -> Element {
        let geo = &self.georeference;
        let model = Element::new("Model")
            .with_child(Element::with_text("altitudeMode", &self.altitude_mode))
            .with_child(
                Element::new("Location")
                    .with_child(Element::with_text("longitude", geo.longitude.to_string()))
                    .with_child(Element::with_text("latitude", geo.latitude.to_string()))
                    .with_child(Element::with_text("altitude", geo.altitude.to_string())),
            )
            .with_child(
                Element::new("Orientation")
                    .with_child(Element::with_text("heading", geo.heading.to_string())),
            )
            .with_child(Element::new("Link").with_child(Element::with_text("href", &self.href)));
        Element::new("Placemark")
            .with_child(Element::with_text("name", &self.name))
            .with_child(model)
    }
}

fn optional_f64(element: &Element, path: &[&str], context: &str) -> Result<Option<f64>, IoError> {
    match element.path_text(path) {
        Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
            IoError::InvalidDocument(format!(
                "placemark {context}: {} is not a number: {raw:?}",
                path.join("/")
            ))
        }),
        None => Ok(None),
    }
}

fn required_f64(element: &Element, path: &[&str], context: &str) -> Result<f64, IoError> {
    optional_f64(element, path, context)?.ok_or_else(|| {
        IoError::InvalidDocument(format!("placemark {context} is missing {}", path.join("/")))
    })
}

/// 解析 KML `coordinates` 文本：空白分隔的 `lon,lat[,alt]` 元组。
pub fn parse_coordinates(raw: &str) -> Result<Vec<LonLat>, IoError> {
    raw.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
            let lat = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok(LonLat::new(lon, lat)),
                _ => Err(IoError::InvalidDocument(format!(
                    "invalid coordinate tuple {tuple:?}"
                ))),
            }
        })
        .collect()
}

/// `kml/Document` 容器；没有 `Document` 时退化为根元素本身。
fn container(root: &Element) -> &Element {
    root.child("Document").unwrap_or(root)
}

/// 追加到 `<Document>`；没有该元素时直接追加到根元素。
fn push_to_container(root: &mut Element, child: Element) {
    match root.child_mut("Document") {
        Some(document) => document.push_child(child),
        None => root.push_child(child),
    }
}

/// 单个瓦片的地标文档（`Tiles/<x>/<y>/..._collada.kml`）。
#[derive(Debug, Clone, PartialEq)]
pub struct TileDocument {
    document: XmlDocument,
}

impl TileDocument {
    pub fn new(document: XmlDocument) -> Self {
        Self { document }
    }

    pub fn into_inner(self) -> XmlDocument {
        self.document
    }

    #[inline]
    pub fn xml(&self) -> &XmlDocument {
        &self.document
    }

    /// 按磁盘顺序返回全部地标（含边界地标）。
    pub fn placemarks(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        container(&self.document.root).descendants_named("Placemark", &mut out);
        out
    }

    /// 仅返回携带模型的实体地标，顺序与磁盘一致。
    pub fn model_placemarks(&self) -> Result<Vec<ModelPlacemark>, IoError> {
        let mut models = Vec::new();
        for placemark in self.placemarks() {
            if let Some(model) = ModelPlacemark::from_element(placemark)? {
                models.push(model);
            }
        }
        Ok(models)
    }

    pub fn contains_placemark(&self, name: &str) -> bool {
        self.placemarks()
            .iter()
            .any(|placemark| placemark.path_text(&["name"]).as_deref() == Some(name))
    }

    /// 边界地标：第一个不含 `Model` 但带有 `coordinates` 的地标。
    pub fn border_coordinates(&self) -> Result<Vec<LonLat>, IoError> {
        for placemark in self.placemarks() {
            if placemark.child("Model").is_some() {
                continue;
            }
            if let Some(raw) = placemark.descendant("coordinates").and_then(Element::text) {
                return parse_coordinates(&raw);
            }
        }
        Err(IoError::InvalidDocument(
            "tile document has no border placemark".to_string(),
        ))
    }

    /// 在容器末尾追加地标，已有内容保持原样。
    pub fn append_placemark(&mut self, placemark: &ModelPlacemark) {
        push_to_container(&mut self.document.root, placemark.to_element());
    }
}

/// 根文档中的一个瓦片文件夹。
#[derive(Debug, Clone, PartialEq)]
pub struct TileFolder {
    pub name: String,
    pub coord: Option<TileCoord>,
    pub extent: Option<TileExtent>,
    pub href: Option<String>,
}

impl TileFolder {
    pub fn from_element(folder: &Element) -> Result<Self, IoError> {
        let name = folder.path_text(&["name"]).unwrap_or_default();
        let extent = match folder.path(&["Region", "LatLonAltBox"]) {
            Some(bbox) => {
                let value = |key: &str| -> Result<f64, IoError> {
                    let raw = bbox.path_text(&[key]).ok_or_else(|| {
                        IoError::InvalidDocument(format!("folder {name} is missing {key}"))
                    })?;
                    raw.parse::<f64>().map_err(|_| {
                        IoError::InvalidDocument(format!(
                            "folder {name}: {key} is not a number: {raw:?}"
                        ))
                    })
                };
                Some(TileExtent::new(
                    value("north")?,
                    value("south")?,
                    value("east")?,
                    value("west")?,
                ))
            }
            None => None,
        };
        let href = folder.path_text(&["NetworkLink", "Link", "href"]);
        let coord = parse_tile_coord(&name).or_else(|| href.as_deref().and_then(parse_tile_coord));
        Ok(Self {
            name,
            coord,
            extent,
            href,
        })
    }

    pub fn to_element(&self) -> Element {
        let mut folder = Element::new("Folder").with_child(Element::with_text("name", &self.name));
        if let Some(extent) = &self.extent {
            folder.push_child(
                Element::new("Region")
                    .with_child(
                        Element::new("LatLonAltBox")
                            .with_child(Element::with_text("north", extent.north.to_string()))
                            .with_child(Element::with_text("south", extent.south.to_string()))
                            .with_child(Element::with_text("east", extent.east.to_string()))
                            .with_child(Element::with_text("west", extent.west.to_string())),
                    )
                    .with_child(
                        Element::new("Lod")
                            .with_child(Element::with_text("minLodPixels", "140"))
                            .with_child(Element::with_text("maxLodPixels", "-1")),
                    ),
            );
        }
        if let Some(href) = &self.href {
            folder.push_child(
                Element::new("NetworkLink")
                    .with_child(Element::with_text("name", "Display as collada"))
                    .with_child(
                        Element::new("Link")
                            .with_child(Element::with_text("href", href))
                            .with_child(Element::with_text("viewRefreshMode", "onRegion")),
                    ),
            );
        }
        folder
    }
}

/// 根瓦片索引文档（瓦片文件夹列表）。
#[derive(Debug, Clone, PartialEq)]
pub struct RootDocument {
    document: XmlDocument,
}

impl RootDocument {
    pub fn new(document: XmlDocument) -> Self {
        Self { document }
    }

    pub fn into_inner(self) -> XmlDocument {
        self.document
    }

    #[inline]
    pub fn xml(&self) -> &XmlDocument {
        &self.document
    }

    fn folder_elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        container(&self.document.root).descendants_named("Folder", &mut out);
        out
    }

    /// 按文档顺序返回瓦片文件夹；无法识别坐标的文件夹也会返回，`coord` 为 `None`。
    pub fn folders(&self) -> Result<Vec<TileFolder>, IoError> {
        self.folder_elements()
            .into_iter()
            .map(TileFolder::from_element)
            .collect()
    }

    pub fn has_folder_for(&self, coord: TileCoord) -> bool {
        self.folder_elements().into_iter().any(|folder| {
            folder
                .path_text(&["name"])
                .and_then(|name| parse_tile_coord(&name))
                == Some(coord)
        })
    }

    pub fn append_folder(&mut self, folder: &TileFolder) {
        push_to_container(&mut self.document.root, folder.to_element());
    }
}

/// 外部建模工具导出的单模型 `doc.kml`。
pub fn read_external_model(document: &XmlDocument) -> Result<ModelPlacemark, IoError> {
    let mut placemarks = Vec::new();
    document.root.descendants_named("Placemark", &mut placemarks);
    if document.root.is("Placemark") {
        placemarks.insert(0, &document.root);
    }
    for placemark in placemarks {
        if let Some(model) = ModelPlacemark::from_element(placemark)? {
            return Ok(model);
        }
    }
    Err(IoError::InvalidDocument(
        "external model document contains no model placemark".to_string(),
    ))
}

/// 新建空的瓦片文档骨架，供测试与新数据集使用。
pub fn empty_kml(name: &str) -> XmlDocument {
    let mut root = Element::new("kml").with_attribute("xmlns", "http://www.opengis.net/kml/2.2");
    root.children.push(XmlNode::Element(
        Element::new("Document").with_child(Element::with_text("name", name)),
    ));
    XmlDocument::new(root)
}
