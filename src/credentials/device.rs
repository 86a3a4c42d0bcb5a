use super::*;

/// One line of the console device table.
///
/// `deviceId;address;type;username;password;secret[;port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub address: String,
    pub device_type: String,
    pub username: FieldValue,
    pub password: FieldValue,
    pub secret: FieldValue,
    pub port: Option<String>,
}

impl DeviceRecord {
    pub fn parse(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split(';').collect();
        let (head, port) = match fields.len() {
            6 => (&fields[..], None),
            7 => (&fields[..6], Some(fields[6].trim().to_string())),
            n => return Err(format!("expected 6 or 7 fields, found {n}")),
        };
        Ok(Self {
            id: head[0].to_string(),
            address: head[1].to_string(),
            device_type: head[2].to_string(),
            username: FieldValue::parse(head[3]),
            password: FieldValue::parse(head[4]),
            secret: FieldValue::parse(head[5]),
            port,
        })
    }

    /// Address, falling back to the device id when empty.
    pub fn address_or_id(&self) -> &str {
        if self.address.is_empty() {
            &self.id
        } else {
            &self.address
        }
    }
}

/// One line of the service device table.
///
/// `deviceId;address;community;port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: String,
    pub address: String,
    pub community: FieldValue,
    pub port: FieldValue,
}

impl ServiceRecord {
    pub fn parse(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split(';').collect();
        match fields.as_slice() {
            [id, address, community, port] => Ok(Self {
                id: id.to_string(),
                address: address.to_string(),
                community: FieldValue::parse(community),
                port: FieldValue::parse(port.trim()),
            }),
            _ => Err(format!("expected 4 fields, found {}", fields.len())),
        }
    }

    pub fn address_or_id(&self) -> &str {
        if self.address.is_empty() {
            &self.id
        } else {
            &self.address
        }
    }
}

/// First console record whose id is exactly `device`; scanning stops there.
pub(super) fn find_console(text: &str, file: &str, device: &str) -> Option<DeviceRecord> {
    find(text, file, device, DeviceRecord::parse, |r| &r.id)
}

/// First service record whose id is exactly `device`.
pub(super) fn find_service(text: &str, file: &str, device: &str) -> Option<ServiceRecord> {
    find(text, file, device, ServiceRecord::parse, |r| &r.id)
}

fn find<R>(
    text: &str,
    file: &str,
    device: &str,
    parse: impl Fn(&str) -> Result<R, String>,
    id: impl Fn(&R) -> &String,
) -> Option<R> {
    for (line_no, line) in table_lines(text) {
        match parse(line) {
            Ok(record) if id(&record) == device => return Some(record),
            Ok(_) => {}
            Err(reason) => debug!("{}", malformed(file, line_no, reason)),
        }
    }
    None
}
