//! Domain descriptor document generation.
//!
//! [`DomainDescriptor`] is the validated, immutable input; [`DomainXmlBuilder`]
//! turns it into the libvirt domain document the hypervisor control plane
//! consumes. The builder is pure: identical descriptors always serialize to
//! byte-identical output, so wall-clock time and the smbios serial are
//! injected by the caller instead of being read here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::types::{instance_dir, FlavorInfo, ProvisionRequest};
use crate::xml::XmlNode;

/// Namespace of the vendor metadata subtree nested under `<metadata>`.
pub const NOVA_NS: &str = "http://openstack.org/xmlns/libvirt/nova/1.0";

/// Validated input for one domain document. Immutable once constructed;
/// a new request always builds a fresh instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDescriptor {
    /// Globally unique domain id
    pub uuid: String,
    /// Domain display name
    pub name: String,
    /// Guest hostname recorded in the vendor metadata
    pub hostname: String,
    /// vcpu count; also sizes the interface queue count and CPU topology
    pub vcpus: u32,
    /// Memory in KiB
    pub memory_kib: u64,
    /// Flavor block of the vendor metadata
    pub flavor: FlavorInfo,
    /// Owning user id
    pub user_id: String,
    /// Owning tenant/project id
    pub tenant_id: String,
    /// Source image id
    pub image_id: String,
    /// MAC of the single bridge attachment
    pub mac: String,
    /// Bridge the interface attaches to
    pub bridge: String,
    /// smbios serial entry (freshly generated per request)
    pub serial_uuid: String,
    /// Instance creation time
    pub created_at: DateTime<Utc>,
    /// Instance mount directory on the host
    pub mount: String,
    /// Host CPU set the vcpus are pinned to
    pub cpuset: String,
    /// Package version stamped into metadata and sysinfo
    pub package_version: String,
}

impl DomainDescriptor {
    /// Build a descriptor from a provisioning request, validating required
    /// fields. `serial_uuid` is the freshly generated smbios serial.
    pub fn from_request(
        request: &ProvisionRequest,
        config: &ProvisionConfig,
        serial_uuid: String,
    ) -> Result<Self> {
        let descriptor = Self {
            uuid: request.uuid.clone(),
            name: request.name.clone(),
            hostname: request.hostname.clone(),
            vcpus: request.vcpus,
            memory_kib: request.memory_mb * 1024,
            flavor: request.flavor.clone(),
            user_id: config.user_id.clone(),
            tenant_id: config.tenant_id.clone(),
            image_id: config.image_ref.clone(),
            mac: request.network.mac.clone(),
            bridge: request.network.bridge.clone(),
            serial_uuid,
            created_at: request.created_at,
            mount: config.mount.clone(),
            cpuset: config.cpuset.clone(),
            package_version: config.package_version.clone(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("uuid", &self.uuid),
            ("name", &self.name),
            ("hostname", &self.hostname),
            ("mac", &self.mac),
            ("bridge", &self.bridge),
            ("serial_uuid", &self.serial_uuid),
            ("mount", &self.mount),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(ProvisionError::InvalidDescriptor(format!(
                    "missing required field: {}",
                    field
                )));
            }
        }
        if self.vcpus == 0 {
            return Err(ProvisionError::InvalidDescriptor(
                "vcpus must be non-zero".to_string(),
            ));
        }
        if self.memory_kib == 0 {
            return Err(ProvisionError::InvalidDescriptor(
                "memory must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// On-host path of the instance's disk image.
    pub fn disk_path(&self) -> String {
        format!("{}/disk", instance_dir(&self.mount, &self.uuid))
    }

    /// On-host path of the instance's console log.
    pub fn console_path(&self) -> String {
        format!("{}/console.log", instance_dir(&self.mount, &self.uuid))
    }

    fn creation_time(&self) -> String {
        self.created_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Builder for the libvirt domain document.
pub struct DomainXmlBuilder<'a> {
    descriptor: &'a DomainDescriptor,
}

impl<'a> DomainXmlBuilder<'a> {
    /// Create a builder for the given descriptor.
    pub fn new(descriptor: &'a DomainDescriptor) -> Self {
        Self { descriptor }
    }

    /// Build and serialize the domain document.
    pub fn build(&self) -> String {
        self.build_tree().to_xml()
    }

    /// Build the in-memory node tree. Child order is the document order.
    pub fn build_tree(&self) -> XmlNode {
        let d = self.descriptor;
        XmlNode::new("domain")
            .attr("type", "kvm")
            .child(XmlNode::text_node("uuid", &d.uuid))
            .child(XmlNode::text_node("name", &d.name))
            .child(XmlNode::text_node("memory", d.memory_kib))
            .child(XmlNode::text_node("vcpu", d.vcpus).attr("cpuset", &d.cpuset))
            .child(self.metadata())
            .child(self.sysinfo())
            .child(self.os())
            .child(self.features())
            .child(self.cputune())
            .child(self.clock())
            .child(self.cpu())
            .child(self.devices())
    }

    /// Vendor metadata subtree. Lives under its own namespace so downstream
    /// tooling can tell it apart from the core hardware description.
    fn metadata(&self) -> XmlNode {
        let d = self.descriptor;
        let instance = XmlNode::new("nova:instance")
            .attr("xmlns:nova", NOVA_NS)
            .child(XmlNode::new("nova:package").attr("version", &d.package_version))
            .child(XmlNode::text_node("nova:name", &d.hostname))
            .child(XmlNode::text_node("nova:creationTime", d.creation_time()))
            .child(
                XmlNode::new("nova:flavor")
                    .attr("name", &d.flavor.name)
                    .child(XmlNode::text_node("nova:memory", d.flavor.memory_mb))
                    .child(XmlNode::text_node("nova:disk", d.flavor.root_gb))
                    .child(XmlNode::text_node("nova:swap", 0))
                    .child(XmlNode::text_node("nova:ephemeral", 0))
                    .child(XmlNode::text_node("nova:vcpus", d.flavor.vcpus)),
            )
            .child(
                XmlNode::new("nova:owner")
                    .child(XmlNode::text_node("nova:user", "admin").attr("uuid", &d.user_id))
                    .child(XmlNode::text_node("nova:project", "admin").attr("uuid", &d.tenant_id)),
            )
            .child(
                XmlNode::new("nova:root")
                    .attr("type", "image")
                    .attr("uuid", &d.image_id),
            );
        XmlNode::new("metadata").child(instance)
    }

    fn sysinfo(&self) -> XmlNode {
        let d = self.descriptor;
        let entry = |name: &str, value: &str| {
            XmlNode::text_node("entry", value).attr("name", name)
        };
        XmlNode::new("sysinfo").attr("type", "smbios").child(
            XmlNode::new("system")
                .child(entry("manufacturer", "Fedora Project"))
                .child(entry("product", "OpenStack Nova"))
                .child(entry("version", &d.package_version))
                .child(entry("serial", &d.serial_uuid))
                .child(entry("uuid", &d.uuid)),
        )
    }

    fn os(&self) -> XmlNode {
        XmlNode::new("os")
            .child(XmlNode::text_node("type", "hvm"))
            .child(XmlNode::new("boot").attr("dev", "hd"))
            .child(XmlNode::new("smbios").attr("mode", "sysinfo"))
    }

    fn features(&self) -> XmlNode {
        XmlNode::new("features")
            .child(XmlNode::new("acpi"))
            .child(XmlNode::new("apic"))
    }

    fn cputune(&self) -> XmlNode {
        XmlNode::new("cputune")
            .child(XmlNode::text_node("shares", self.descriptor.flavor.memory_mb))
    }

    fn clock(&self) -> XmlNode {
        XmlNode::new("clock")
            .attr("offset", "utc")
            .child(XmlNode::new("timer").attr("name", "pit").attr("tickpolicy", "delay"))
            .child(XmlNode::new("timer").attr("name", "rtc").attr("tickpolicy", "catchup"))
            .child(XmlNode::new("timer").attr("name", "hpet").attr("present", "no"))
    }

    fn cpu(&self) -> XmlNode {
        XmlNode::new("cpu")
            .attr("mode", "host-model")
            .attr("match", "exact")
            .child(
                XmlNode::new("topology")
                    .attr("sockets", self.descriptor.vcpus)
                    .attr("cores", 1)
                    .attr("threads", 1),
            )
    }

    fn devices(&self) -> XmlNode {
        let d = self.descriptor;
        XmlNode::new("devices")
            .child(self.disk())
            .child(self.interface())
            .child(
                XmlNode::new("serial")
                    .attr("type", "file")
                    .child(XmlNode::new("source").attr("path", d.console_path())),
            )
            .child(XmlNode::new("serial").attr("type", "pty"))
            .child(XmlNode::new("input").attr("type", "tablet").attr("bus", "usb"))
            .child(
                XmlNode::new("graphics")
                    .attr("type", "vnc")
                    .attr("autoport", "yes")
                    .attr("keymap", "en-us")
                    .attr("listen", "0.0.0.0"),
            )
            .child(XmlNode::new("video").child(XmlNode::new("model").attr("type", "cirrus")))
            .child(
                XmlNode::new("memballoon")
                    .attr("model", "virtio")
                    .child(XmlNode::new("stats").attr("period", 10)),
            )
    }

    fn disk(&self) -> XmlNode {
        let d = self.descriptor;
        XmlNode::new("disk")
            .attr("type", "file")
            .attr("device", "disk")
            .child(
                XmlNode::new("driver")
                    .attr("name", "qemu")
                    .attr("type", "qcow2")
                    .attr("cache", "none"),
            )
            .child(XmlNode::new("source").attr("file", d.disk_path()))
            .child(XmlNode::new("target").attr("bus", "virtio").attr("dev", "vda"))
    }

    fn interface(&self) -> XmlNode {
        let d = self.descriptor;
        XmlNode::new("interface")
            .attr("type", "bridge")
            .child(XmlNode::new("mac").attr("address", &d.mac))
            .child(XmlNode::new("model").attr("type", "virtio"))
            .child(XmlNode::new("source").attr("bridge", &d.bridge))
            .child(
                XmlNode::new("driver")
                    .attr("name", "vhost")
                    .attr("queues", d.vcpus),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn descriptor() -> DomainDescriptor {
        DomainDescriptor {
            uuid: "abc-123".to_string(),
            name: "instance-00000001".to_string(),
            hostname: "web-1".to_string(),
            vcpus: 4,
            memory_kib: 4194304,
            flavor: FlavorInfo {
                name: "c4m4".to_string(),
                memory_mb: 4096,
                vcpus: 4,
                root_gb: 40,
            },
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            image_id: "image-1".to_string(),
            mac: "fa:16:3e:aa:bb:cc".to_string(),
            bridge: "br100".to_string(),
            serial_uuid: "serial-1".to_string(),
            created_at: Utc.with_ymd_and_hms(2020, 5, 21, 3, 45, 12).unwrap(),
            mount: "/data".to_string(),
            cpuset: "4-39".to_string(),
            package_version: "2015.1.4-1.el7".to_string(),
        }
    }

    #[test]
    fn identical_inputs_serialize_byte_identically() {
        let a = DomainXmlBuilder::new(&descriptor()).build();
        let b = DomainXmlBuilder::new(&descriptor()).build();
        assert_eq!(a, b);
    }

    #[test]
    fn disk_path_and_queue_count_follow_the_request() {
        let xml = DomainXmlBuilder::new(&descriptor()).build();
        assert!(xml.contains("<source file=\"/data/nova/instances/abc-123/disk\"/>"));
        assert!(xml.contains("<driver name=\"vhost\" queues=\"4\"/>"));
    }

    #[test]
    fn identity_block_is_rendered_first() {
        let tree = DomainXmlBuilder::new(&descriptor()).build_tree();
        assert_eq!(tree.tag(), "domain");
        assert_eq!(tree.get_attr("type"), Some("kvm"));

        let tags: Vec<&str> = tree.children().iter().map(|c| c.tag()).collect();
        assert_eq!(
            tags,
            [
                "uuid", "name", "memory", "vcpu", "metadata", "sysinfo", "os", "features",
                "cputune", "clock", "cpu", "devices"
            ]
        );
        assert_eq!(tree.find("uuid").unwrap().text(), Some("abc-123"));
        assert_eq!(tree.find("memory").unwrap().text(), Some("4194304"));
        assert_eq!(tree.find("vcpu").unwrap().get_attr("cpuset"), Some("4-39"));
    }

    #[test]
    fn vendor_metadata_lives_under_its_own_namespace() {
        let tree = DomainXmlBuilder::new(&descriptor()).build_tree();
        let instance = tree
            .find("metadata")
            .and_then(|m| m.find("nova:instance"))
            .unwrap();
        assert_eq!(instance.get_attr("xmlns:nova"), Some(NOVA_NS));
        assert_eq!(
            instance.find("nova:creationTime").unwrap().text(),
            Some("2020-05-21 03:45:12")
        );

        let flavor = instance.find("nova:flavor").unwrap();
        assert_eq!(flavor.get_attr("name"), Some("c4m4"));
        assert_eq!(flavor.find("nova:swap").unwrap().text(), Some("0"));

        let owner = instance.find("nova:owner").unwrap();
        assert_eq!(owner.find("nova:user").unwrap().get_attr("uuid"), Some("user-1"));
    }

    #[test]
    fn console_serial_precedes_the_pty_serial() {
        let tree = DomainXmlBuilder::new(&descriptor()).build_tree();
        let devices = tree.find("devices").unwrap();
        let serial_types: Vec<&str> = devices
            .children()
            .iter()
            .filter(|c| c.tag() == "serial")
            .map(|c| c.get_attr("type").unwrap())
            .collect();
        assert_eq!(serial_types, ["file", "pty"]);

        let file_serial = devices
            .children()
            .iter()
            .find(|c| c.tag() == "serial" && c.get_attr("type") == Some("file"))
            .unwrap();
        assert_eq!(
            file_serial.find("source").unwrap().get_attr("path"),
            Some("/data/nova/instances/abc-123/console.log")
        );
    }

    #[test]
    fn document_round_trips_through_the_parser() {
        let tree = DomainXmlBuilder::new(&descriptor()).build_tree();
        let parsed = XmlNode::parse(&tree.to_xml()).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn construction_rejects_missing_required_fields() {
        let mut bad = descriptor();
        bad.mac = String::new();
        assert!(bad.validate().is_err());

        let mut bad = descriptor();
        bad.vcpus = 0;
        assert!(bad.validate().is_err());

        let mut bad = descriptor();
        bad.memory_kib = 0;
        assert!(bad.validate().is_err());
    }
}
