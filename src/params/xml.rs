//! Optimizer parameter document.
//!
//! The optimizer reads a flat sequence of top-level elements, one per option,
//! preceded by an `<inputs>` element listing the distance transforms one per
//! line. There is no enclosing root element.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;

use super::{ParamValue, ParameterSet};
use crate::manifest::FileManifest;

#[derive(Debug, Error)]
pub enum ParameterFileError {
    #[error("failed to write parameter XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("parameter XML is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Renders `params` with `inputs` as the optimizer's input list.
pub fn render_parameter_xml(params: &ParameterSet, inputs: &FileManifest) -> Result<String, ParameterFileError> {
    let mut writer = Writer::new(Vec::new());

    let listing = inputs
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    write_element(&mut writer, "inputs", &format!("\n{listing}\n"))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;

    for (name, value) in params.iter() {
        let text = match value {
            ParamValue::Planes(_) | ParamValue::IntList(_) => format!("\n{value}\n"),
            _ => value.to_string(),
        };
        write_element(&mut writer, name, &text)?;
        writer.write_event(Event::Text(BytesText::new("\n")))?;
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

/// Writes the parameter document to `path` and returns it.
pub fn write_parameter_file(
    path: &Path,
    params: &ParameterSet,
    inputs: &FileManifest,
) -> Result<PathBuf, ParameterFileError> {
    let xml = render_parameter_xml(params, inputs)?;
    fs::write(path, xml).map_err(|source| ParameterFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("wrote optimizer parameters to {}", path.display());
    Ok(path.to_path_buf())
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), ParameterFileError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
